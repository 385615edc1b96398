//! Transaction frames and the options used to open them.

use smallvec::SmallVec;

use crate::isolation::IsolationLevel;
use crate::record::RecordRef;

/// The kind of the innermost transaction frame on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    /// No transaction is open (depth 0).
    Closed,
    /// A real transaction opened with `BEGIN` (depth 1).
    Real,
    /// A savepoint inside a real transaction (depth > 1).
    Savepoint,
}

/// Options for [`TransactionManager::transaction`](crate::TransactionManager::transaction)
/// and [`TransactionManager::begin_transaction`](crate::TransactionManager::begin_transaction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Always open a new frame, even if the current one could be joined.
    pub requires_new: bool,
    /// Whether nested `transaction` calls may run inside the opened frame.
    pub joinable: bool,
    /// Isolation level for a new real transaction.
    pub isolation: Option<IsolationLevel>,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            requires_new: false,
            joinable: true,
            isolation: None,
        }
    }
}

impl TransactionOptions {
    /// Create options that join an open transaction when possible.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Always open a new frame (a savepoint when nested).
    #[must_use]
    pub fn requires_new(mut self) -> Self {
        self.requires_new = true;
        self
    }

    /// Set whether nested calls may join the opened frame.
    #[must_use]
    pub fn joinable(mut self, joinable: bool) -> Self {
        self.joinable = joinable;
        self
    }

    /// Request an isolation level for the real transaction.
    #[must_use]
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FrameKind {
    Real,
    Savepoint(String),
}

/// One open transaction level.
pub(crate) struct TransactionFrame {
    pub(crate) kind: FrameKind,
    pub(crate) records: SmallVec<[RecordRef; 4]>,
    pub(crate) joinable: bool,
    /// Set once commit or rollback has been decided for this frame.
    pub(crate) finishing: bool,
}

impl TransactionFrame {
    pub(crate) fn real(joinable: bool) -> Self {
        Self::with_kind(FrameKind::Real, joinable)
    }

    pub(crate) fn savepoint(name: String, joinable: bool) -> Self {
        Self::with_kind(FrameKind::Savepoint(name), joinable)
    }

    fn with_kind(kind: FrameKind, joinable: bool) -> Self {
        Self {
            kind,
            records: SmallVec::new(),
            joinable,
            finishing: false,
        }
    }

    pub(crate) fn transaction_kind(&self) -> TransactionKind {
        match self.kind {
            FrameKind::Real => TransactionKind::Real,
            FrameKind::Savepoint(_) => TransactionKind::Savepoint,
        }
    }
}

impl std::fmt::Debug for TransactionFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionFrame")
            .field("kind", &self.kind)
            .field("records", &self.records.len())
            .field("joinable", &self.joinable)
            .field("finishing", &self.finishing)
            .finish()
    }
}
