//! Resource lifecycle around units of work.
//!
//! A [`LifecycleCoordinator`] brackets every unit of work with resource setup
//! and teardown. It runs in one of two modes:
//!
//! - [`Mode::Request`]: resources start once at application startup, each
//!   request gets a cheap per-unit cleanup, and resources stop once at
//!   shutdown.
//! - [`Mode::Task`]: resources start and stop around every single task,
//!   since a task may not assume a pool survives between invocations.
//!
//! In both modes cleanup runs on every exit path, including cancellation.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::{DbError, PoolError, Session};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Resources could not be initialized. Fatal for the unit of work, and
    /// for the process when raised at application startup.
    #[error("failed to start resources: {0}")]
    Startup(#[source] DbError),

    /// Teardown of a resource set failed. Closing the sqlx pool itself is
    /// infallible, so [`crate::container::PoolResources`] never raises this;
    /// it exists for resource sets whose teardown can fail.
    #[error("failed to shut down resources: {0}")]
    Shutdown(String),

    #[error("resources have not been started")]
    NotStarted,

    #[error("cleanup failed: {0}")]
    Cleanup(#[from] PoolError),

    #[error("a {0} coordinator cannot run tasks")]
    WrongMode(Mode),
}

// ============================================================================
// RESOURCES
// ============================================================================

/// The process-wide resource set a coordinator brackets.
#[async_trait]
pub trait Resources: Send + Sync {
    /// Opens everything. Must be safe to call on already open resources.
    async fn init(&self) -> Result<(), LifecycleError>;

    /// Closes everything. Must be safe to call on closed resources.
    async fn shutdown(&self) -> Result<(), LifecycleError>;

    /// A fresh session for one unit of work.
    fn session(&self) -> Session;

    /// Returns whatever `session` borrowed. Must succeed for sessions that
    /// never borrowed anything.
    fn cleanup(&self, session: &Session) -> Result<(), LifecycleError>;
}

// ============================================================================
// UNITS OF WORK
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Request,
    Task,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::Task => write!(f, "task"),
        }
    }
}

/// One request or one task invocation, depending on the [`Mode`] of the
/// coordinator that opened it.
///
/// Cleanup runs exactly once per unit: through [`UnitOfWork::finish`], or on
/// drop when the unit is abandoned (for example when its future is
/// cancelled).
pub struct UnitOfWork {
    id: Uuid,
    mode: Mode,
    session: Session,
    resources: Arc<dyn Resources>,
    started: Instant,
    finished: bool,
}

impl UnitOfWork {
    fn new(mode: Mode, resources: Arc<dyn Resources>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            session: resources.session(),
            resources,
            started: Instant::now(),
            finished: false,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn finish(mut self) -> Result<(), LifecycleError> {
        self.finished = true;
        self.release()
    }

    fn release(&self) -> Result<(), LifecycleError> {
        let result = self.resources.cleanup(&self.session);
        tracing::debug!(
            unit_id = %self.id,
            mode = %self.mode,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "unit of work released"
        );
        result
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        tracing::warn!(unit_id = %self.id, mode = %self.mode, "unit of work abandoned before completion");
        if let Err(err) = self.release() {
            tracing::error!(unit_id = %self.id, error = %err, "cleanup of abandoned unit of work failed");
        }
    }
}

// ============================================================================
// TASK HOOKS
// ============================================================================

/// Identifies one task invocation to the hooks.
#[derive(Debug, Clone)]
pub struct TaskRun {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Failed(String),
}

impl TaskOutcome {
    fn of<T, E: fmt::Display>(result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => Self::Succeeded,
            Err(err) => Self::Failed(err.to_string()),
        }
    }
}

/// Called by the task harness around every task it runs. `before` must
/// complete before the task body starts; `after` runs once the body is done,
/// whatever its outcome.
#[async_trait]
pub trait TaskHooks: Send + Sync {
    async fn before(&self, run: &TaskRun) -> Result<(), LifecycleError>;
    async fn after(&self, run: &TaskRun, outcome: &TaskOutcome) -> Result<(), LifecycleError>;
}

// ============================================================================
// COORDINATOR
// ============================================================================

pub struct LifecycleCoordinator {
    resources: Arc<dyn Resources>,
    mode: Mode,
    running: AtomicBool,
    // Serializes start/stop so concurrent callers never double-open.
    transition: Mutex<()>,
}

impl LifecycleCoordinator {
    pub fn new(resources: Arc<dyn Resources>, mode: Mode) -> Self {
        Self {
            resources,
            mode,
            running: AtomicBool::new(false),
            transition: Mutex::new(()),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Initializes the resource set. Does nothing when already started.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        let _transition = self.transition.lock().await;
        if self.is_running() {
            return Ok(());
        }
        self.resources.init().await?;
        self.running.store(true, Ordering::SeqCst);
        tracing::debug!(mode = %self.mode, "resources started");
        Ok(())
    }

    /// Shuts the resource set down. Does nothing when not started.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        let _transition = self.transition.lock().await;
        if !self.is_running() {
            return Ok(());
        }
        self.running.store(false, Ordering::SeqCst);
        self.resources.shutdown().await?;
        tracing::debug!(mode = %self.mode, "resources stopped");
        Ok(())
    }

    pub async fn on_app_startup(&self) -> Result<(), LifecycleError> {
        tracing::info!("starting application resources");
        self.start().await
    }

    pub async fn on_app_shutdown(&self) -> Result<(), LifecycleError> {
        tracing::info!("stopping application resources");
        self.stop().await
    }

    pub async fn on_task_pre_run(&self) -> Result<(), LifecycleError> {
        self.start().await
    }

    pub async fn on_task_post_run(&self) -> Result<(), LifecycleError> {
        self.stop().await
    }

    /// Opens a unit of work. Fails when resources have not been started.
    pub fn begin(&self) -> Result<UnitOfWork, LifecycleError> {
        if !self.is_running() {
            return Err(LifecycleError::NotStarted);
        }
        Ok(UnitOfWork::new(self.mode, Arc::clone(&self.resources)))
    }

    /// Runs `handler` inside a unit of work and cleans up afterwards.
    ///
    /// If both the handler and the cleanup fail, the handler's error is
    /// returned and the cleanup error is logged.
    pub async fn dispatch<F, Fut, T, E>(&self, handler: F) -> Result<T, E>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LifecycleError>,
    {
        let unit = self.begin()?;
        let outcome = handler(unit.session().clone()).await;
        let teardown = unit.finish();
        settle(outcome, teardown)
    }

    /// Runs one task with the full start/stop bracket around it.
    ///
    /// Only valid in [`Mode::Task`]. If the returned future is dropped while
    /// the task is running, `stop` is still scheduled on the runtime.
    pub async fn run_task<F, Fut, T, E>(self: &Arc<Self>, name: &str, body: F) -> Result<T, E>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LifecycleError> + fmt::Display,
    {
        if self.mode != Mode::Task {
            return Err(LifecycleError::WrongMode(self.mode).into());
        }

        let run = TaskRun {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        let pending_stop = StopOnDrop::arm(Arc::clone(self));

        let outcome = match self.before(&run).await {
            Ok(()) => self.dispatch(body).await,
            Err(err) => Err(E::from(err)),
        };

        pending_stop.disarm();
        let teardown = self.after(&run, &TaskOutcome::of(&outcome)).await;
        settle(outcome, teardown)
    }
}

#[async_trait]
impl TaskHooks for LifecycleCoordinator {
    async fn before(&self, run: &TaskRun) -> Result<(), LifecycleError> {
        tracing::debug!(task_id = %run.id, task = %run.name, "task pre-run");
        self.on_task_pre_run().await
    }

    async fn after(&self, run: &TaskRun, outcome: &TaskOutcome) -> Result<(), LifecycleError> {
        match outcome {
            TaskOutcome::Succeeded => {
                tracing::debug!(task_id = %run.id, task = %run.name, "task post-run");
            }
            TaskOutcome::Failed(reason) => {
                tracing::warn!(task_id = %run.id, task = %run.name, error = %reason, "task failed");
            }
        }
        self.on_task_post_run().await
    }
}

/// Schedules `stop` if a task future is dropped between its pre-run and
/// post-run hooks.
struct StopOnDrop {
    coordinator: Option<Arc<LifecycleCoordinator>>,
}

impl StopOnDrop {
    fn arm(coordinator: Arc<LifecycleCoordinator>) -> Self {
        Self {
            coordinator: Some(coordinator),
        }
    }

    fn disarm(mut self) {
        self.coordinator = None;
    }
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        let Some(coordinator) = self.coordinator.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = coordinator.on_task_post_run().await {
                        tracing::error!(error = %err, "stopping resources of a cancelled task failed");
                    }
                });
            }
            Err(_) => {
                tracing::error!("task cancelled outside a runtime; resources left running");
            }
        }
    }
}

/// Combines a unit's outcome with its teardown result. The first failure
/// wins.
fn settle<T, E>(outcome: Result<T, E>, teardown: Result<(), LifecycleError>) -> Result<T, E>
where
    E: From<LifecycleError>,
{
    match (outcome, teardown) {
        (outcome, Ok(())) => outcome,
        (Ok(_), Err(err)) => Err(err.into()),
        (Err(original), Err(err)) => {
            tracing::warn!(error = %err, "teardown failed after an earlier failure; keeping the original error");
            Err(original)
        }
    }
}
