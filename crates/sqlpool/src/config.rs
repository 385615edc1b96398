//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Configuration for a connection pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Logical database name, used in diagnostics and passed to the factory.
    pub database: String,

    /// Maximum number of physical connections (default: 5).
    pub pool_size: usize,

    /// How long a checkout may wait for a connection (default: 5s).
    pub checkout_timeout: Duration,

    /// How long a leased connection may go unused before the reaper may
    /// probe it (default: 5s).
    pub dead_connection_timeout: Duration,

    /// How often the reaper runs (default: disabled).
    pub reaping_frequency: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            database: "primary".to_string(),
            pool_size: 5,
            checkout_timeout: Duration::from_secs(5),
            dead_connection_timeout: Duration::from_secs(5),
            reaping_frequency: None,
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `key=value;key=value` settings string.
    ///
    /// Durations are given in seconds and may be fractional:
    /// ```text
    /// database=orders;pool=10;checkout_timeout=2.5;reaping_frequency=30
    /// ```
    /// `reaping_frequency` accepts `0` or `off` to disable reaping.
    pub fn from_connection_string(conn_str: &str) -> Result<Self, PoolError> {
        let mut config = Self::default();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| PoolError::Config(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "database" | "name" => {
                    config.database = value.to_string();
                }
                "pool" | "pool_size" => {
                    config.pool_size = value
                        .parse()
                        .map_err(|_| PoolError::Config(format!("invalid pool size: {value}")))?;
                }
                "checkout_timeout" | "wait_timeout" => {
                    config.checkout_timeout = parse_seconds(&key, value)?;
                }
                "dead_connection_timeout" => {
                    config.dead_connection_timeout = parse_seconds(&key, value)?;
                }
                "reaping_frequency" => {
                    config.reaping_frequency = if value.eq_ignore_ascii_case("off") {
                        None
                    } else {
                        Some(parse_seconds(&key, value)?).filter(|d| !d.is_zero())
                    };
                }
                _ => {
                    // Ignore unknown options for forward compatibility
                    tracing::debug!(
                        key = key,
                        value = value,
                        "ignoring unknown pool option"
                    );
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can back a working pool.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.pool_size == 0 {
            return Err(PoolError::Config("pool_size must be at least 1".into()));
        }
        if self.reaping_frequency.is_some_and(|d| d.is_zero()) {
            return Err(PoolError::Config(
                "reaping_frequency must be positive; use None to disable".into(),
            ));
        }
        Ok(())
    }

    /// Set the logical database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the checkout timeout.
    #[must_use]
    pub fn checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    /// Set the dead connection timeout.
    #[must_use]
    pub fn dead_connection_timeout(mut self, timeout: Duration) -> Self {
        self.dead_connection_timeout = timeout;
        self
    }

    /// Enable the reaper with the given frequency.
    #[must_use]
    pub fn reaping_frequency(mut self, frequency: Duration) -> Self {
        self.reaping_frequency = Some(frequency);
        self
    }
}

fn parse_seconds(key: &str, value: &str) -> Result<Duration, PoolError> {
    value
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| PoolError::Config(format!("invalid {key}: {value}")))
}
