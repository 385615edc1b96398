//! # sqlpool-transaction
//!
//! Nested transactions on a single database session.
//!
//! The first level is a real transaction (`BEGIN` / `COMMIT` / `ROLLBACK`);
//! deeper levels are savepoints. Domain records can register with the
//! innermost level to be told how the transaction ended.
//!
//! ## Features
//!
//! - Real transactions with optional isolation level
//! - Savepoint-backed nesting with partial rollback
//! - Join-or-nest semantics via [`TransactionOptions`]
//! - Deduplicated commit/rollback callbacks, deferred across released savepoints
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlpool_transaction::{TransactionManager, TransactionOptions};
//!
//! let mut tx = TransactionManager::new(session);
//! tx.begin_transaction(TransactionOptions::new())?;   // BEGIN
//! tx.begin_transaction(TransactionOptions::new())?;   // SAVEPOINT savepoint_1
//! tx.commit_transaction()?;                           // RELEASE SAVEPOINT savepoint_1
//! tx.rollback_transaction()?;                         // ROLLBACK
//! assert_eq!(tx.open_transactions(), 0);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod driver;
pub mod error;
pub mod isolation;
pub mod manager;
pub mod record;
pub mod state;

pub use driver::TransactionDriver;
pub use error::{BoxError, TransactionBodyError, TransactionError};
pub use isolation::IsolationLevel;
pub use manager::TransactionManager;
pub use record::{RecordRef, TransactionRecord};
pub use state::{TransactionKind, TransactionOptions};
