//! Pool error types.

use std::time::Duration;

use sqlpool_transaction::{BoxError, TransactionBodyError, TransactionError};
use thiserror::Error;

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors that can occur when obtaining or using pooled connections.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// No connection became available within the checkout timeout.
    #[error(
        "could not obtain a database connection within {:.3} seconds (waited {:.3} seconds)",
        .requested.as_secs_f64(),
        .elapsed.as_secs_f64()
    )]
    Timeout {
        /// The timeout the caller asked for.
        requested: Duration,
        /// How long the caller actually waited.
        elapsed: Duration,
    },

    /// The pool cannot provide a physical connection.
    #[error("connection not established: {0}")]
    ConnectionNotEstablished(String),

    /// Invalid pool configuration.
    #[error("invalid pool configuration: {0}")]
    Config(String),

    /// Transaction error on a pooled connection.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// The driver failed.
    #[error("driver error: {0}")]
    Driver(#[source] BoxError),

    /// IO error, such as failing to start the reaper thread.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PoolError {
    /// Check if this error is a checkout timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if retrying the operation may succeed.
    ///
    /// Only timeouts are retryable; the pool was busy, not broken.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.is_timeout()
    }
}

impl TransactionBodyError for PoolError {
    fn is_rollback(&self) -> bool {
        matches!(self, Self::Transaction(TransactionError::Rollback))
    }
}
