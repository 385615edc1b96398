//! # sqlpool-testing
//!
//! Test infrastructure for sqlpool.
//!
//! Provides an in-memory [`MockAdapter`] whose liveness and failures are
//! controlled through a shared [`MockSession`] handle, a [`MockFactory`] that
//! remembers every session it opened, and a [`RecordingRecord`] that counts
//! transaction callbacks.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlpool::{Pool, PoolConfig};
//! use sqlpool_testing::MockFactory;
//!
//! let factory = MockFactory::new();
//! let pool = Pool::new(PoolConfig::new().pool_size(2), factory.clone())?;
//! let conn = pool.checkout()?;
//!
//! factory.session(0).unwrap().kill();
//! pool.checkin(&conn);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use sqlpool::{Adapter, ConnectionFactory, PoolConfig};
use sqlpool_transaction::{BoxError, TransactionDriver, TransactionRecord};
use thiserror::Error;

/// Errors raised by the mock session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MockError {
    /// A statement matched the configured failure prefix.
    #[error("statement failed: {0}")]
    Statement(String),

    /// The session is dead and refuses to reconnect.
    #[error("reconnect refused")]
    ReconnectRefused,

    /// The factory refuses to open sessions.
    #[error("connection refused")]
    ConnectRefused,

    /// A record callback was told to fail.
    #[error("record callback failed")]
    Callback,
}

/// Shared state of one mock session.
///
/// Tests keep a handle to this to inspect or sabotage the session after the
/// pool has taken ownership of the adapter.
#[derive(Debug)]
pub struct MockSession {
    id: usize,
    alive: AtomicBool,
    refuse_reconnect: AtomicBool,
    reloadable: AtomicBool,
    supports_isolation: AtomicBool,
    disconnects: AtomicUsize,
    reconnects: AtomicUsize,
    statements: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
}

impl MockSession {
    fn new(id: usize) -> Self {
        Self {
            id,
            alive: AtomicBool::new(true),
            refuse_reconnect: AtomicBool::new(false),
            reloadable: AtomicBool::new(false),
            supports_isolation: AtomicBool::new(true),
            disconnects: AtomicUsize::new(0),
            reconnects: AtomicUsize::new(0),
            statements: Mutex::new(Vec::new()),
            fail_on: Mutex::new(None),
        }
    }

    /// Order in which the factory opened this session, from 1.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Make the liveness probe fail.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Make the liveness probe succeed again.
    pub fn revive(&self) {
        self.alive.store(true, Ordering::SeqCst);
    }

    /// Whether the session is currently alive.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Make `reconnect` fail while the session is dead.
    pub fn refuse_reconnect(&self, refuse: bool) {
        self.refuse_reconnect.store(refuse, Ordering::SeqCst);
    }

    /// Mark the session as requiring a reload.
    pub fn set_reloadable(&self, reloadable: bool) {
        self.reloadable.store(reloadable, Ordering::SeqCst);
    }

    /// Control whether the session claims isolation level support.
    pub fn set_supports_isolation(&self, supported: bool) {
        self.supports_isolation.store(supported, Ordering::SeqCst);
    }

    /// Fail every statement starting with `prefix`.
    pub fn fail_on(&self, prefix: impl Into<String>) {
        *self.fail_on.lock() = Some(prefix.into());
    }

    /// Stop failing statements.
    pub fn clear_failures(&self) {
        *self.fail_on.lock() = None;
    }

    /// Times the session was disconnected.
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Times the session reconnected.
    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Every statement executed successfully, in order.
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }
}

/// In-memory database session.
#[derive(Debug)]
pub struct MockAdapter {
    session: Arc<MockSession>,
}

impl MockAdapter {
    /// Create a standalone session.
    pub fn new() -> Self {
        Self::with_id(0)
    }

    fn with_id(id: usize) -> Self {
        Self {
            session: Arc::new(MockSession::new(id)),
        }
    }

    /// Shared handle to this session's state.
    pub fn session(&self) -> Arc<MockSession> {
        Arc::clone(&self.session)
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionDriver for MockAdapter {
    fn execute(&mut self, sql: &str) -> Result<(), BoxError> {
        if let Some(prefix) = self.session.fail_on.lock().as_deref() {
            if sql.starts_with(prefix) {
                return Err(Box::new(MockError::Statement(sql.to_string())));
            }
        }
        tracing::trace!(session = self.session.id, sql = sql, "mock execute");
        self.session.statements.lock().push(sql.to_string());
        Ok(())
    }

    fn supports_transaction_isolation(&self) -> bool {
        self.session.supports_isolation.load(Ordering::SeqCst)
    }
}

impl Adapter for MockAdapter {
    fn is_active(&mut self) -> bool {
        self.session.is_alive()
    }

    fn reconnect(&mut self) -> Result<(), BoxError> {
        if self.session.refuse_reconnect.load(Ordering::SeqCst) {
            return Err(Box::new(MockError::ReconnectRefused));
        }
        self.session.reconnects.fetch_add(1, Ordering::SeqCst);
        self.session.revive();
        Ok(())
    }

    fn disconnect(&mut self) {
        self.session.disconnects.fetch_add(1, Ordering::SeqCst);
        self.session.kill();
    }

    fn requires_reloading(&self) -> bool {
        self.session.reloadable.load(Ordering::SeqCst)
    }
}

/// Factory that opens [`MockAdapter`]s and keeps a handle to each.
///
/// Clones share the same session list.
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    sessions: Arc<Mutex<Vec<Arc<MockSession>>>>,
    refuse: Arc<AtomicBool>,
    delay: Arc<Mutex<Duration>>,
}

impl MockFactory {
    /// Create a factory that has opened nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make further `connect` calls fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Make further `connect` calls sleep for `delay` before opening.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Number of sessions opened so far.
    pub fn connects(&self) -> usize {
        self.sessions.lock().len()
    }

    /// The `index`-th session opened, from 0.
    pub fn session(&self, index: usize) -> Option<Arc<MockSession>> {
        self.sessions.lock().get(index).cloned()
    }

    /// Every session opened so far.
    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().clone()
    }
}

impl ConnectionFactory<MockAdapter> for MockFactory {
    fn connect(&self, config: &PoolConfig) -> Result<MockAdapter, BoxError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Box::new(MockError::ConnectRefused));
        }
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut sessions = self.sessions.lock();
        let adapter = MockAdapter::with_id(sessions.len() + 1);
        sessions.push(adapter.session());
        tracing::debug!(database = %config.database, session = sessions.len(), "mock connect");
        Ok(adapter)
    }
}

/// Transaction record that counts its callbacks.
#[derive(Debug, Default)]
pub struct RecordingRecord {
    committed: AtomicUsize,
    rolled_back: Mutex<Vec<bool>>,
    fail: AtomicBool,
}

impl RecordingRecord {
    /// Create a record whose callbacks succeed.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a record whose callbacks always fail.
    pub fn failing() -> Arc<Self> {
        let record = Self::default();
        record.fail.store(true, Ordering::SeqCst);
        Arc::new(record)
    }

    /// Times `committed` was called.
    pub fn commits(&self) -> usize {
        self.committed.load(Ordering::SeqCst)
    }

    /// The `full_rollback` flag of every `rolled_back` call, in order.
    pub fn rollbacks(&self) -> Vec<bool> {
        self.rolled_back.lock().clone()
    }
}

impl TransactionRecord for RecordingRecord {
    fn committed(&self) -> Result<(), BoxError> {
        self.committed.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Box::new(MockError::Callback));
        }
        Ok(())
    }

    fn rolled_back(&self, full_rollback: bool) -> Result<(), BoxError> {
        self.rolled_back.lock().push(full_rollback);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Box::new(MockError::Callback));
        }
        Ok(())
    }
}

/// Install a test-writer tracing subscriber. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
