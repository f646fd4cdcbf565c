//! Pool configuration read from the environment.

use crate::error::{Error, Result};
use crate::executor::TxPool;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;
use std::time::Duration;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Settings used to open the MySQL pool behind a [`TxPool`].
///
/// | Variable                        | Default |
/// |---------------------------------|---------|
/// | `DATABASE_URL`                  | required |
/// | `DATABASE_MAX_CONNECTIONS`      | 10      |
/// | `DATABASE_ACQUIRE_TIMEOUT_SECS` | 30      |
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Config {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        }
    }

    /// Reads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `DATABASE_URL` is unset or a numeric
    /// variable does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| Error::Config("DATABASE_URL is not set".to_string()))?;

        let mut config = Self::new(database_url);
        if let Some(raw) = lookup("DATABASE_MAX_CONNECTIONS") {
            config.max_connections = parse_positive("DATABASE_MAX_CONNECTIONS", &raw)?;
        }
        if let Some(raw) = lookup("DATABASE_ACQUIRE_TIMEOUT_SECS") {
            let secs = parse_positive("DATABASE_ACQUIRE_TIMEOUT_SECS", &raw)?;
            config.acquire_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn pool_options(&self) -> MySqlPoolOptions {
        MySqlPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
    }

    /// Connects to the database and wraps the pool in a [`TxPool`].
    pub async fn connect(&self) -> Result<TxPool<MySqlPool>> {
        let pool = self.pool_options().connect(&self.database_url).await?;
        Ok(TxPool::new(pool))
    }
}

fn parse_positive<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Ok(value),
        _ => Err(Error::Config(format!(
            "{name} must be a positive integer, got {raw:?}"
        ))),
    }
}
