use std::sync::Arc;

use crate::lifecycle::LifecycleCoordinator;
use crate::tasks::TaskQueue;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<LifecycleCoordinator>,
    pub tasks: TaskQueue,
}

impl AppState {
    pub fn new(coordinator: Arc<LifecycleCoordinator>, tasks: TaskQueue) -> Self {
        Self { coordinator, tasks }
    }
}
