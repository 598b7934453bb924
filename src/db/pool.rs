//! Postgres connection pool with an explicit open/close lifecycle.

use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgConnection, PgPool, Postgres};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::db::DbError;

#[derive(Clone, Debug)]
pub struct PoolSettings {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub statement_timeout: Duration,
}

impl PoolSettings {
    /// Settings for the pool serving HTTP requests.
    pub fn for_requests(config: &AppConfig) -> Self {
        Self {
            database_url: config.database_url.clone(),
            max_connections: config.db_max_connections,
            acquire_timeout: config.acquire_timeout(),
            statement_timeout: config.statement_timeout(),
        }
    }

    /// Settings for the pool the background worker opens per task.
    pub fn for_tasks(config: &AppConfig) -> Self {
        Self {
            max_connections: config.task_db_max_connections,
            ..Self::for_requests(config)
        }
    }
}

/// Misuse of the pool's lease accounting.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("lease from pool generation {lease} released into generation {current}")]
    StaleLease { lease: u64, current: u64 },

    #[error("session connection is still borrowed")]
    SessionBusy,
}

/// A connection checked out of a [`ResourcePool`], tagged with the pool
/// generation it came from.
pub struct Lease {
    generation: u64,
    conn: PoolConnection<Postgres>,
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Deref for Lease {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        &self.conn
    }
}

impl DerefMut for Lease {
    fn deref_mut(&mut self) -> &mut PgConnection {
        &mut self.conn
    }
}

pub struct ResourcePool {
    settings: PoolSettings,
    pool: RwLock<Option<PgPool>>,
    generation: AtomicU64,
}

impl ResourcePool {
    /// Creates a closed pool. Nothing connects until [`ResourcePool::init`].
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            settings,
            pool: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Opens the pool and verifies a connection can be made. Calling it on an
    /// open pool does nothing.
    pub async fn init(&self) -> Result<(), DbError> {
        let mut slot = self.pool.write().await;
        if slot.is_some() {
            return Ok(());
        }

        let statement_timeout = format!("{}ms", self.settings.statement_timeout.as_millis());
        let options = PgConnectOptions::from_str(&self.settings.database_url)?
            .options([("statement_timeout", statement_timeout.as_str())]);

        let pool = PgPoolOptions::new()
            .max_connections(self.settings.max_connections)
            .acquire_timeout(self.settings.acquire_timeout)
            .connect_with(options)
            .await?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *slot = Some(pool);

        tracing::info!(
            generation,
            max_connections = self.settings.max_connections,
            "database pool opened"
        );
        Ok(())
    }

    /// Closes the pool, waiting for checked-out connections to come back.
    /// Calling it on a closed pool does nothing. `PgPool::close` cannot fail,
    /// so neither can this.
    pub async fn shutdown(&self) {
        let pool = self.pool.write().await.take();
        if let Some(pool) = pool {
            pool.close().await;
            tracing::info!(
                generation = self.generation.load(Ordering::SeqCst),
                "database pool closed"
            );
        }
    }

    /// Checks out a connection, waiting up to the configured acquire timeout.
    pub async fn acquire(&self) -> Result<Lease, DbError> {
        let pool = self
            .pool
            .read()
            .await
            .clone()
            .ok_or(DbError::ResourceClosed)?;

        let conn = pool.acquire().await?;

        Ok(Lease {
            generation: self.generation.load(Ordering::SeqCst),
            conn,
        })
    }

    /// Returns a connection to the pool. The connection goes back to sqlx
    /// even when the lease is reported as stale.
    pub fn release(&self, lease: Lease) -> Result<(), PoolError> {
        let current = self.generation.load(Ordering::SeqCst);
        let Lease { generation, conn } = lease;
        drop(conn);

        if generation != current {
            return Err(PoolError::StaleLease {
                lease: generation,
                current,
            });
        }
        Ok(())
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        let pool = self
            .pool
            .read()
            .await
            .clone()
            .ok_or(DbError::ResourceClosed)?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_support::settings;

    async fn is_open(pool: &ResourcePool) -> bool {
        pool.pool.read().await.is_some()
    }

    #[tokio::test]
    async fn closed_pool_reports_resource_closed() {
        let pool = ResourcePool::new(settings());
        assert!(!is_open(&pool).await);

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, DbError::ResourceClosed));
    }

    #[tokio::test]
    async fn shutdown_of_a_closed_pool_is_a_no_op() {
        let pool = ResourcePool::new(settings());
        pool.shutdown().await;
        pool.shutdown().await;
        assert!(!is_open(&pool).await);
    }

    #[tokio::test]
    async fn shutdown_closes_an_open_pool() {
        let pool = ResourcePool::new(settings());
        let options = PgConnectOptions::from_str(&pool.settings.database_url).unwrap();
        *pool.pool.write().await = Some(PgPoolOptions::new().connect_lazy_with(options));
        assert!(is_open(&pool).await);

        pool.shutdown().await;

        assert!(!is_open(&pool).await);
        assert!(matches!(
            pool.acquire().await.unwrap_err(),
            DbError::ResourceClosed
        ));
    }

    #[tokio::test]
    async fn malformed_url_fails_init_without_opening() {
        let pool = ResourcePool::new(PoolSettings {
            database_url: "not a url".to_string(),
            ..settings()
        });

        assert!(pool.init().await.is_err());
        assert!(!is_open(&pool).await);
    }

    #[test]
    fn task_pool_uses_its_own_limit() {
        let config = AppConfig::from_lookup(|key| match key {
            "DATABASE_URL" => Some("postgres://db/app".to_string()),
            "DB_MAX_CONNECTIONS" => Some("20".to_string()),
            "TASK_DB_MAX_CONNECTIONS" => Some("3".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(PoolSettings::for_requests(&config).max_connections, 20);
        let task = PoolSettings::for_tasks(&config);
        assert_eq!(task.max_connections, 3);
        assert_eq!(task.database_url, "postgres://db/app");
    }
}
