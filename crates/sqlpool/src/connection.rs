//! Pooled connections and the driver capability the pool manages.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use sqlpool_transaction::{
    BoxError, TransactionBodyError, TransactionDriver, TransactionManager, TransactionOptions,
};

use crate::config::PoolConfig;

/// Identity of the execution context holding a lease.
///
/// Callers choose their own ids (a task id, a request id, a worker number);
/// the pool only compares them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(u64);

impl OwnerId {
    /// Wrap a caller-chosen id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Allocate an id no other call to `next` in this process has returned.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1 << 32);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for OwnerId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner-{}", self.0)
    }
}

/// A physical database session as seen by the pool.
///
/// The transaction statements come from [`TransactionDriver`]; the methods
/// here cover liveness and lifecycle.
pub trait Adapter: TransactionDriver + Send + 'static {
    /// Probe whether the session is still usable.
    fn is_active(&mut self) -> bool;

    /// Liveness probe used by the reaper on connections leased to someone
    /// else.
    ///
    /// The pool only calls this when it could lock the session, so the owner
    /// is not mid-statement. Drivers whose probe is unsafe even then may
    /// override this to return `true`.
    fn is_active_threadsafe(&mut self) -> bool {
        self.is_active()
    }

    /// Re-establish the session after it died.
    fn reconnect(&mut self) -> Result<(), BoxError>;

    /// Make sure the session is usable, reconnecting if it is not.
    fn verify(&mut self) -> Result<(), BoxError> {
        if self.is_active() {
            Ok(())
        } else {
            self.reconnect()
        }
    }

    /// Close the session.
    fn disconnect(&mut self);

    /// Whether the session must be dropped when application code reloads.
    fn requires_reloading(&self) -> bool {
        false
    }
}

/// Creates physical sessions for a pool.
pub trait ConnectionFactory<A>: Send + Sync + 'static {
    /// Open a new session for the pool described by `config`.
    fn connect(&self, config: &PoolConfig) -> Result<A, BoxError>;
}

impl<A, F> ConnectionFactory<A> for F
where
    F: Fn(&PoolConfig) -> Result<A, BoxError> + Send + Sync + 'static,
{
    fn connect(&self, config: &PoolConfig) -> Result<A, BoxError> {
        self(config)
    }
}

/// Locked access to a connection's session and transaction stack.
pub type Session<'a, A> = MutexGuard<'a, TransactionManager<A>>;

#[derive(Debug, Clone, Copy)]
struct Lease {
    in_use: bool,
    last_use: Instant,
    owner: Option<OwnerId>,
}

/// A connection owned by a pool.
///
/// Lease state is only changed by the pool while it holds its own lock.
/// The session (driver plus transaction stack) has a separate lock that the
/// leasing caller takes to run statements.
pub struct Connection<A> {
    id: u64,
    created_at: Instant,
    lease: Mutex<Lease>,
    session: Mutex<TransactionManager<A>>,
}

impl<A: Adapter> Connection<A> {
    pub(crate) fn new(id: u64, adapter: A) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            lease: Mutex::new(Lease {
                in_use: false,
                last_use: now,
                owner: None,
            }),
            session: Mutex::new(TransactionManager::new(adapter)),
        }
    }

    /// Lock the session to run statements or manage transactions.
    ///
    /// Do not hold the returned guard while calling back into the pool with
    /// this connection.
    pub fn session(&self) -> Session<'_, A> {
        self.session.lock()
    }

    /// Lock the session if no one else holds it.
    pub fn try_session(&self) -> Option<Session<'_, A>> {
        self.session.try_lock()
    }

    /// Run `body` inside a transaction on this connection.
    ///
    /// See [`TransactionManager::transaction`].
    pub fn transaction<T, E, F>(&self, options: TransactionOptions, body: F) -> Result<Option<T>, E>
    where
        F: FnOnce(&mut TransactionManager<A>) -> Result<T, E>,
        E: TransactionBodyError,
    {
        self.session().transaction(options, body)
    }

    /// Number of transactions open on this connection.
    pub fn open_transactions(&self) -> usize {
        self.session().open_transactions()
    }

    pub(crate) fn verify(&self) -> Result<(), BoxError> {
        self.session().driver_mut().verify()
    }

    pub(crate) fn disconnect(&self) {
        self.session().driver_mut().disconnect();
    }
}

impl<A> Connection<A> {
    /// Pool-assigned connection id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// When the connection was opened.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Whether the connection is leased.
    #[must_use]
    pub fn in_use(&self) -> bool {
        self.lease.lock().in_use
    }

    /// When the connection was last leased.
    #[must_use]
    pub fn last_use(&self) -> Instant {
        self.lease.lock().last_use
    }

    /// Owner the connection is reserved for, if any.
    #[must_use]
    pub fn owner(&self) -> Option<OwnerId> {
        self.lease.lock().owner
    }

    /// Snapshot of the lease state.
    #[must_use]
    pub fn metadata(&self) -> ConnectionMetadata {
        let lease = *self.lease.lock();
        ConnectionMetadata {
            id: self.id,
            created_at: self.created_at,
            last_use: lease.last_use,
            in_use: lease.in_use,
            owner: lease.owner,
        }
    }

    /// Mark the connection leased. A connection already in use keeps its
    /// original `last_use`.
    pub(crate) fn lease(&self) {
        let mut lease = self.lease.lock();
        if !lease.in_use {
            lease.in_use = true;
            lease.last_use = Instant::now();
        }
    }

    pub(crate) fn expire(&self) {
        let mut lease = self.lease.lock();
        lease.in_use = false;
        lease.owner = None;
    }

    pub(crate) fn set_owner(&self, owner: Option<OwnerId>) {
        self.lease.lock().owner = owner;
    }

    /// Leased and unused since before `cutoff`.
    pub(crate) fn is_stale(&self, cutoff: Instant) -> bool {
        let lease = self.lease.lock();
        lease.in_use && lease.last_use < cutoff
    }
}

impl<A> PartialEq for Connection<A> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<A> Eq for Connection<A> {}

impl<A> fmt::Debug for Connection<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lease = *self.lease.lock();
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("in_use", &lease.in_use)
            .field("owner", &lease.owner)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of a connection's lease state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionMetadata {
    /// Pool-assigned connection id.
    pub id: u64,
    /// When the connection was opened.
    pub created_at: Instant,
    /// When the connection was last leased.
    pub last_use: Instant,
    /// Whether the connection is leased.
    pub in_use: bool,
    /// Owner the connection is reserved for.
    pub owner: Option<OwnerId>,
}

impl ConnectionMetadata {
    /// Time since the connection was opened.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the connection was last leased.
    #[must_use]
    pub fn since_last_use(&self) -> Duration {
        self.last_use.elapsed()
    }
}
