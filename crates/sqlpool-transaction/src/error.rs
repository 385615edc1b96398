//! Transaction error types.

use thiserror::Error;

/// Boxed error returned by drivers and record callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for transaction operations.
pub type Result<T> = std::result::Result<T, TransactionError>;

/// Errors that can occur while opening, committing or rolling back transactions.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransactionError {
    /// An isolation level was requested for a savepoint.
    #[error("cannot set transaction isolation in a nested transaction")]
    IsolationInNestedTransaction,

    /// An isolation level was requested while joining an open transaction.
    #[error("cannot set isolation when joining a transaction")]
    IsolationWhenJoining,

    /// The driver cannot set isolation levels.
    #[error("driver does not support setting transaction isolation")]
    IsolationUnsupported,

    /// Signal raised by a transaction body to roll back silently.
    ///
    /// [`TransactionManager::transaction`](crate::TransactionManager::transaction)
    /// rolls back the frame it opened and swallows this error.
    #[error("transaction rolled back")]
    Rollback,

    /// The driver failed to execute a transaction statement.
    #[error("driver error: {0}")]
    Driver(#[source] BoxError),
}

impl TransactionError {
    /// Wrap a driver error.
    pub fn driver(err: impl Into<BoxError>) -> Self {
        Self::Driver(err.into())
    }

    /// Check if this is an isolation-level misuse.
    #[must_use]
    pub fn is_isolation_error(&self) -> bool {
        matches!(
            self,
            Self::IsolationInNestedTransaction
                | Self::IsolationWhenJoining
                | Self::IsolationUnsupported
        )
    }
}

/// Error types that a transaction body may return.
///
/// The body of [`TransactionManager::transaction`](crate::TransactionManager::transaction)
/// reports failure through its own error type. That type must be able to carry
/// a [`TransactionError`] and to say whether it is the silent rollback signal.
pub trait TransactionBodyError: From<TransactionError> {
    /// Whether this error is the [`TransactionError::Rollback`] signal.
    fn is_rollback(&self) -> bool;
}

impl TransactionBodyError for TransactionError {
    fn is_rollback(&self) -> bool {
        matches!(self, Self::Rollback)
    }
}
