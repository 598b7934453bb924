//! Builds the object graph once at startup and hands every component its
//! dependencies through its constructor.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use tokio::task::JoinHandle;

use crate::api;
use crate::config::AppConfig;
use crate::db::{PoolSettings, ResourcePool, Session};
use crate::lifecycle::{LifecycleCoordinator, LifecycleError, Mode, Resources};
use crate::state::AppState;
use crate::tasks::{Job, TaskQueue, Worker};

/// The resource set behind a coordinator: one connection pool.
pub struct PoolResources {
    pool: Arc<ResourcePool>,
}

impl PoolResources {
    pub fn new(pool: Arc<ResourcePool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Resources for PoolResources {
    async fn init(&self) -> Result<(), LifecycleError> {
        self.pool.init().await.map_err(LifecycleError::Startup)
    }

    async fn shutdown(&self) -> Result<(), LifecycleError> {
        // Closing a sqlx pool cannot fail.
        self.pool.shutdown().await;
        Ok(())
    }

    fn session(&self) -> Session {
        Session::new(Arc::clone(&self.pool))
    }

    fn cleanup(&self, session: &Session) -> Result<(), LifecycleError> {
        session.cleanup()?;
        Ok(())
    }
}

pub struct AppContainer {
    pub config: AppConfig,
    /// Pool shared by all HTTP requests.
    pub pool: Arc<ResourcePool>,
    pub coordinator: Arc<LifecycleCoordinator>,
    pub task_coordinator: Arc<LifecycleCoordinator>,
    pub tasks: TaskQueue,
    jobs: Option<tokio::sync::mpsc::Receiver<Job>>,
}

impl AppContainer {
    /// Wires everything together. Nothing connects yet; call
    /// [`AppContainer::on_app_startup`] before serving.
    pub fn build(config: AppConfig) -> Self {
        let pool = Arc::new(ResourcePool::new(PoolSettings::for_requests(&config)));
        let coordinator = Arc::new(LifecycleCoordinator::new(
            Arc::new(PoolResources::new(Arc::clone(&pool))),
            Mode::Request,
        ));

        // The worker gets its own pool, opened and closed around each task.
        let task_pool = Arc::new(ResourcePool::new(PoolSettings::for_tasks(&config)));
        let task_coordinator = Arc::new(LifecycleCoordinator::new(
            Arc::new(PoolResources::new(task_pool)),
            Mode::Task,
        ));

        let (tasks, jobs) = TaskQueue::new(config.task_queue_capacity);

        Self {
            config,
            pool,
            coordinator,
            task_coordinator,
            tasks,
            jobs: Some(jobs),
        }
    }

    pub async fn on_app_startup(&self) -> Result<(), LifecycleError> {
        self.coordinator.on_app_startup().await
    }

    pub async fn on_app_shutdown(&self) -> Result<(), LifecycleError> {
        self.coordinator.on_app_shutdown().await
    }

    pub fn state(&self) -> AppState {
        AppState::new(Arc::clone(&self.coordinator), self.tasks.clone())
    }

    pub fn router(&self) -> Router {
        api::app(self.state())
    }

    /// Starts the background worker. Returns `None` if it was already taken.
    pub fn spawn_worker(&mut self) -> Option<JoinHandle<usize>> {
        let jobs = self.jobs.take()?;
        let worker = Worker::new(jobs, Arc::clone(&self.task_coordinator));
        Some(tokio::spawn(worker.run()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        AppConfig::from_lookup(|key| match key {
            "DATABASE_URL" => Some("postgres://localhost/content_test".to_string()),
            "TASK_QUEUE_CAPACITY" => Some("4".to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn build_wires_one_coordinator_per_mode() {
        let container = AppContainer::build(config());

        assert_eq!(container.coordinator.mode(), Mode::Request);
        assert_eq!(container.task_coordinator.mode(), Mode::Task);
        assert!(!container.coordinator.is_running());
        assert_eq!(container.pool.settings().max_connections, 10);
    }

    #[tokio::test]
    async fn worker_can_only_be_spawned_once() {
        let mut container = AppContainer::build(config());

        let handle = container.spawn_worker().unwrap();
        assert!(container.spawn_worker().is_none());

        // Dropping every queue handle lets the worker drain and exit.
        drop(container);
        assert_eq!(handle.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pool_resources_cleanup_tolerates_unused_sessions() {
        let resources = PoolResources::new(Arc::new(ResourcePool::new(
            crate::test_support::settings(),
        )));

        let session = resources.session();
        resources.cleanup(&session).unwrap();
        resources.shutdown().await.unwrap();
    }
}
