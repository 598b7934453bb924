use std::sync::Arc;

use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

use crate::db::{DbError, Lease, PoolError, ResourcePool};

/// Database access scoped to one unit of work.
///
/// The first call to [`Session::connection`] checks a connection out of the
/// pool; later calls reuse it. [`Session::cleanup`] hands it back. Clones
/// share the same slot, so a handler and the middleware that created the
/// session see the same connection.
#[derive(Clone)]
pub struct Session {
    pool: Arc<ResourcePool>,
    lease: Arc<Mutex<Option<Lease>>>,
}

impl Session {
    pub fn new(pool: Arc<ResourcePool>) -> Self {
        Self {
            pool,
            lease: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn connection(&self) -> Result<MappedMutexGuard<'_, Lease>, DbError> {
        let mut slot = self.lease.lock().await;
        if slot.is_none() {
            *slot = Some(self.pool.acquire().await?);
        }
        // The slot was filled above while the guard was held.
        MutexGuard::try_map(slot, Option::as_mut).map_err(|_| DbError::ResourceClosed)
    }

    /// Returns the session's connection to the pool. Succeeds when nothing
    /// was ever acquired, and may be called repeatedly.
    pub fn cleanup(&self) -> Result<(), PoolError> {
        let mut slot = self.lease.try_lock().map_err(|_| PoolError::SessionBusy)?;
        match slot.take() {
            Some(lease) => self.pool.release(lease),
            None => Ok(()),
        }
    }
}
