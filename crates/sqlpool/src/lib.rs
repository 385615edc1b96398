//! # sqlpool
//!
//! Bounded, thread-safe pool of database connections.
//!
//! Connections are leased to owners (a thread, a request, a worker) and
//! returned when the owner is done. Callers that find the pool exhausted
//! wait in strict arrival order for up to a configurable timeout. An
//! optional reaper thread reclaims connections whose owners died without
//! returning them.
//!
//! ## Features
//!
//! - FIFO-fair blocking checkout with a bounded timeout
//! - Owner-keyed reservations: one connection per owner until released
//! - Verification on checkout with transparent replacement of dead sessions
//! - Background reaping of abandoned leases
//! - Nested transactions per connection, backed by savepoints
//! - Multi-pool registry keyed by role and shard, scoped to one process
//! - Pool status and metrics for observability
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlpool::{OwnerId, Pool, PoolConfig, TransactionOptions};
//! use std::time::Duration;
//!
//! let config = PoolConfig::from_connection_string(
//!     "database=orders;pool=10;checkout_timeout=2;reaping_frequency=30",
//! )?;
//! let pool = Pool::new(config, |config: &PoolConfig| MyAdapter::connect(&config.database))?;
//!
//! let owner = OwnerId::next();
//! pool.with_connection(owner, |conn| {
//!     conn.transaction(TransactionOptions::new(), |tx| {
//!         tx.driver_mut().execute("INSERT INTO orders DEFAULT VALUES")?;
//!         Ok::<_, sqlpool::PoolError>(())
//!     })
//! })?;
//!
//! let status = pool.status();
//! println!("Pool utilization: {:.1}%", status.utilization());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod pool;
pub mod queue;
pub mod reaper;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::{PoolError, Result};

// Connections
pub use connection::{
    Adapter, Connection, ConnectionFactory, ConnectionMetadata, OwnerId, Session,
};

// Pool types
pub use manager::{PoolKey, PoolManager};
pub use pool::{Pool, PoolBuilder, PoolMetrics, PoolStatus, PooledConnection};
pub use queue::WaitQueue;
pub use reaper::Reaper;

// Transactions
pub use sqlpool_transaction::{
    BoxError, IsolationLevel, RecordRef, TransactionDriver, TransactionError, TransactionKind,
    TransactionManager, TransactionOptions, TransactionRecord,
};
