use std::env;
use std::time::Duration;

use anyhow::Context;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout_ms: u64,
    pub db_statement_timeout_ms: u64,
    pub task_db_max_connections: u32,
    pub task_queue_capacity: usize,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        // A missing .env file is fine; real deployments set the environment directly.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so parsing can be
    /// exercised without mutating the process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;
        let bind_addr = var_or("BIND_ADDR", "0.0.0.0:8080");
        let db_max_connections = var_or("DB_MAX_CONNECTIONS", "10")
            .parse()
            .context("DB_MAX_CONNECTIONS")?;
        let db_acquire_timeout_ms = var_or("DB_ACQUIRE_TIMEOUT_MS", "5000")
            .parse()
            .context("DB_ACQUIRE_TIMEOUT_MS")?;
        let db_statement_timeout_ms = var_or("DB_STATEMENT_TIMEOUT_MS", "30000")
            .parse()
            .context("DB_STATEMENT_TIMEOUT_MS")?;
        let task_db_max_connections = var_or("TASK_DB_MAX_CONNECTIONS", "2")
            .parse()
            .context("TASK_DB_MAX_CONNECTIONS")?;
        let task_queue_capacity = var_or("TASK_QUEUE_CAPACITY", "256")
            .parse()
            .context("TASK_QUEUE_CAPACITY")?;

        if db_max_connections == 0 || task_db_max_connections == 0 {
            anyhow::bail!("connection limits must be positive");
        }
        if task_queue_capacity == 0 {
            anyhow::bail!("TASK_QUEUE_CAPACITY must be positive");
        }

        Ok(Self {
            database_url,
            bind_addr,
            db_max_connections,
            db_acquire_timeout_ms,
            db_statement_timeout_ms,
            task_db_max_connections,
            task_queue_capacity,
        })
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.db_acquire_timeout_ms)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.db_statement_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config =
            AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://db/app")])).unwrap();

        assert_eq!(config.database_url, "postgres://db/app");
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.db_max_connections, 10);
        assert_eq!(config.acquire_timeout(), Duration::from_secs(5));
        assert_eq!(config.statement_timeout(), Duration::from_secs(30));
        assert_eq!(config.task_db_max_connections, 2);
        assert_eq!(config.task_queue_capacity, 256);
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let err = AppConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db/app"),
            ("DB_MAX_CONNECTIONS", "lots"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("DB_MAX_CONNECTIONS"));
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        assert!(
            AppConfig::from_lookup(lookup_from(&[
                ("DATABASE_URL", "postgres://db/app"),
                ("TASK_DB_MAX_CONNECTIONS", "0"),
            ]))
            .is_err()
        );
    }
}
