//! Fakes shared by the unit tests. Nothing here needs a database.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::db::{DbError, PoolError, PoolSettings, ResourcePool, Session};
use crate::lifecycle::{LifecycleError, Resources};

pub fn settings() -> PoolSettings {
    PoolSettings {
        database_url: "postgres://localhost/content_test".to_string(),
        max_connections: 2,
        acquire_timeout: Duration::from_millis(50),
        statement_timeout: Duration::from_secs(1),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Init,
    Cleanup,
    Shutdown,
}

/// Records every lifecycle call. Sessions it hands out point at a pool that
/// is never opened, so any query through them fails with `ResourceClosed`.
pub struct RecordingResources {
    pool: Arc<ResourcePool>,
    calls: Mutex<Vec<Call>>,
    fail_init: AtomicBool,
    fail_cleanup: AtomicBool,
    fail_shutdown: AtomicBool,
}

impl RecordingResources {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pool: Arc::new(ResourcePool::new(settings())),
            calls: Mutex::new(Vec::new()),
            fail_init: AtomicBool::new(false),
            fail_cleanup: AtomicBool::new(false),
            fail_shutdown: AtomicBool::new(false),
        })
    }

    pub fn fail_init(&self) {
        self.fail_init.store(true, Ordering::SeqCst);
    }

    pub fn fail_cleanup(&self) {
        self.fail_cleanup.store(true, Ordering::SeqCst);
    }

    pub fn fail_shutdown(&self) {
        self.fail_shutdown.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls excluding per-unit cleanup.
    pub fn lifecycle_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| *call != Call::Cleanup)
            .collect()
    }

    pub fn count(&self, call: Call) -> usize {
        self.calls().into_iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Resources for RecordingResources {
    async fn init(&self) -> Result<(), LifecycleError> {
        self.record(Call::Init);
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(LifecycleError::Startup(DbError::Interface(
                "connection refused".to_string(),
            )));
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), LifecycleError> {
        self.record(Call::Shutdown);
        if self.fail_shutdown.load(Ordering::SeqCst) {
            return Err(LifecycleError::Shutdown("pool refused to close".to_string()));
        }
        Ok(())
    }

    fn session(&self) -> Session {
        Session::new(Arc::clone(&self.pool))
    }

    fn cleanup(&self, session: &Session) -> Result<(), LifecycleError> {
        self.record(Call::Cleanup);
        if self.fail_cleanup.load(Ordering::SeqCst) {
            return Err(LifecycleError::Cleanup(PoolError::SessionBusy));
        }
        session.cleanup()?;
        Ok(())
    }
}
