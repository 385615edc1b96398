//! Connection pool implementation.
//!
//! One [`Pool`] serves one logical database. All pool state (every
//! connection, the idle queue and the owner reservations) lives behind a
//! single mutex. Checkout is the only operation that waits, and only for up
//! to the configured checkout timeout.
//!
//! The pool mutex is never held across driver calls. Opening a connection
//! first reserves a slot under the lock, connects with the lock released, and
//! then re-locks to register the connection or hand the slot back. Checkout
//! verification, reaper probes and disconnects likewise run unlocked.
//!
//! A checked-in connection with open transaction frames is a caller bug. The
//! pool logs it and returns the connection to the idle queue unchanged.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::connection::{Adapter, Connection, ConnectionFactory, OwnerId};
use crate::error::{PoolError, Result};
use crate::queue::WaitQueue;
use crate::reaper::Reaper;

/// A bounded pool of connections to one logical database.
///
/// Cloning a `Pool` yields another handle to the same pool.
///
/// # Example
///
/// ```rust,ignore
/// use sqlpool::{OwnerId, Pool, PoolConfig};
/// use std::time::Duration;
///
/// let pool = Pool::builder()
///     .pool_size(10)
///     .checkout_timeout(Duration::from_secs(2))
///     .reaping_frequency(Duration::from_secs(30))
///     .build(|config: &PoolConfig| MyAdapter::connect(&config.database))?;
///
/// let owner = OwnerId::new(request_id);
/// let conn = pool.connection_for(owner)?;
/// conn.session().driver_mut().execute("SELECT 1")?;
/// pool.release_connection(owner);
/// ```
pub struct Pool<A: Adapter> {
    inner: Arc<PoolInner<A>>,
}

struct PoolInner<A: Adapter> {
    /// Pool configuration.
    config: PoolConfig,

    /// Opens new physical sessions.
    factory: Arc<dyn ConnectionFactory<A>>,

    /// Everything guarded by the pool lock.
    state: Mutex<PoolState<A>>,

    /// Counter for generating connection IDs.
    next_connection_id: AtomicU64,

    /// When the pool was created.
    created_at: Instant,

    /// Pool metrics.
    metrics: Mutex<PoolMetricsInner>,

    /// Background reaper, when configured.
    reaper: Mutex<Option<Reaper>>,
}

struct PoolState<A> {
    /// Every connection the pool owns, leased or idle.
    connections: Vec<Arc<Connection<A>>>,
    /// Idle connections.
    available: WaitQueue<Arc<Connection<A>>>,
    /// Leases held on behalf of owners.
    reserved: HashMap<OwnerId, Arc<Connection<A>>>,
    /// Reverse index of `reserved`, keyed by connection id.
    reserved_by_connection: HashMap<u64, OwnerId>,
    /// When false, no new physical connection is opened.
    automatic_reconnect: bool,
    /// Connections being opened with the lock released.
    pending: usize,
    /// Of `pending`, those that will be queued for blocked waiters.
    pending_for_waiters: usize,
}

impl<A> PoolState<A> {
    fn has_capacity(&self, pool_size: usize) -> bool {
        self.connections.len() + self.pending < pool_size
    }

    fn owns(&self, conn: &Arc<Connection<A>>) -> bool {
        self.connections.iter().any(|owned| Arc::ptr_eq(owned, conn))
    }
}

fn available<A>(state: &mut PoolState<A>) -> &mut WaitQueue<Arc<Connection<A>>> {
    &mut state.available
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    /// Total connections created.
    connections_created: u64,
    /// Total connections closed.
    connections_closed: u64,
    /// Total connections reaped.
    connections_reaped: u64,
    /// Total successful checkouts.
    checkouts_successful: u64,
    /// Total failed checkouts (timeouts, errors).
    checkouts_failed: u64,
    /// Total checkout verifications performed.
    verifications_performed: u64,
    /// Total verifications that found a dead session.
    verifications_failed: u64,
}

impl<A: Adapter> Pool<A> {
    /// Create a new pool builder.
    #[must_use]
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    /// Create a new pool with the given configuration.
    ///
    /// No connection is opened until the first checkout. If the
    /// configuration has a reaping frequency, the reaper starts now.
    pub fn new(config: PoolConfig, factory: impl ConnectionFactory<A>) -> Result<Self> {
        Self::with_factory(config, Arc::new(factory))
    }

    fn with_factory(config: PoolConfig, factory: Arc<dyn ConnectionFactory<A>>) -> Result<Self> {
        config.validate()?;

        let inner = Arc::new(PoolInner {
            config: config.clone(),
            factory,
            state: Mutex::new(PoolState {
                connections: Vec::with_capacity(config.pool_size),
                available: WaitQueue::new(),
                reserved: HashMap::new(),
                reserved_by_connection: HashMap::new(),
                automatic_reconnect: true,
                pending: 0,
                pending_for_waiters: 0,
            }),
            next_connection_id: AtomicU64::new(1),
            created_at: Instant::now(),
            metrics: Mutex::new(PoolMetricsInner::default()),
            reaper: Mutex::new(None),
        });

        if let Some(frequency) = config.reaping_frequency {
            let weak = Arc::downgrade(&inner);
            let reaper = Reaper::spawn(frequency, move || match weak.upgrade() {
                Some(inner) => {
                    Pool { inner }.reap();
                    true
                }
                None => false,
            })?;
            *inner.reaper.lock() = Some(reaper);
        }

        tracing::info!(
            database = %config.database,
            pool_size = config.pool_size,
            checkout_timeout_ms = config.checkout_timeout.as_millis() as u64,
            reaping_frequency = ?config.reaping_frequency,
            "connection pool created"
        );

        Ok(Self { inner })
    }

    /// Create an empty pool with this pool's configuration and factory.
    ///
    /// Used to give a forked process its own pool without inheriting
    /// connections.
    pub fn reestablish(&self) -> Result<Self> {
        Self::with_factory(self.inner.config.clone(), Arc::clone(&self.inner.factory))
    }

    /// Get the connection reserved for `owner`, checking one out if it has
    /// none.
    ///
    /// Calling this again from the same owner without releasing returns the
    /// same connection.
    pub fn connection_for(&self, owner: OwnerId) -> Result<Arc<Connection<A>>> {
        let start = Instant::now();
        if let Some(conn) = self.inner.state.lock().reserved.get(&owner) {
            return Ok(Arc::clone(conn));
        }

        let conn = self.checkout_from(start)?;
        let mut state = self.inner.state.lock();
        if let Some(existing) = state.reserved.get(&owner).cloned() {
            Self::checkin_locked(&mut state, &conn);
            return Ok(existing);
        }
        state.reserved.insert(owner, Arc::clone(&conn));
        state.reserved_by_connection.insert(conn.id(), owner);
        conn.set_owner(Some(owner));
        tracing::debug!(connection_id = conn.id(), owner = %owner, "reserved connection");
        Ok(conn)
    }

    /// Check out a connection not tied to any owner.
    ///
    /// Return it with [`checkin`](Self::checkin).
    pub fn checkout(&self) -> Result<Arc<Connection<A>>> {
        self.checkout_from(Instant::now())
    }

    /// Check out a connection that is checked back in when dropped.
    pub fn get(&self) -> Result<PooledConnection<A>> {
        let conn = self.checkout()?;
        Ok(PooledConnection {
            conn: Some(conn),
            pool: self.clone(),
        })
    }

    /// Return a connection to the idle queue.
    ///
    /// Connections that no longer belong to the pool are ignored.
    pub fn checkin(&self, conn: &Arc<Connection<A>>) {
        let mut state = self.inner.state.lock();
        Self::checkin_locked(&mut state, conn);
    }

    /// Check in the connection reserved for `owner`, if any.
    pub fn release_connection(&self, owner: OwnerId) {
        let mut state = self.inner.state.lock();
        if let Some(conn) = state.reserved.remove(&owner) {
            state.reserved_by_connection.remove(&conn.id());
            Self::checkin_locked(&mut state, &conn);
        }
    }

    /// Whether `owner` currently holds a lease.
    #[must_use]
    pub fn is_active_connection(&self, owner: OwnerId) -> bool {
        self.inner
            .state
            .lock()
            .reserved
            .get(&owner)
            .is_some_and(|conn| conn.in_use())
    }

    /// Run `f` with the owner's connection.
    ///
    /// If the owner had no lease before the call, the connection is released
    /// when `f` returns, whether it succeeded or not.
    pub fn with_connection<T, E, F>(&self, owner: OwnerId, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Connection<A>) -> std::result::Result<T, E>,
        E: From<PoolError>,
    {
        let fresh = !self.is_active_connection(owner);
        let conn = self.connection_for(owner)?;
        let result = f(&conn);
        if fresh {
            self.release_connection(owner);
        }
        result
    }

    /// Take a connection out of the pool without closing it.
    ///
    /// The caller becomes responsible for the connection. If threads are
    /// waiting and the pool is now below capacity, a replacement is opened
    /// for them.
    pub fn remove(&self, conn: &Arc<Connection<A>>) {
        Self::remove_locked(&mut self.inner.state.lock(), conn);
        self.replenish();
    }

    /// Remove and close leased connections whose owners have gone away.
    ///
    /// A connection is reaped when it has been leased for longer than
    /// `dead_connection_timeout` and fails the driver's liveness probe.
    /// Connections whose session is locked are in active use and are left
    /// alone. Returns the number of connections reaped.
    pub fn reap(&self) -> usize {
        let Some(cutoff) = Instant::now().checked_sub(self.inner.config.dead_connection_timeout)
        else {
            return 0;
        };

        let stale: Vec<_> = self
            .inner
            .state
            .lock()
            .connections
            .iter()
            .filter(|conn| conn.is_stale(cutoff))
            .cloned()
            .collect();

        let mut reaped = 0;
        for conn in stale {
            let alive = match conn.try_session() {
                Some(mut session) => session.driver_mut().is_active_threadsafe(),
                None => true,
            };
            if alive {
                continue;
            }

            {
                let mut state = self.inner.state.lock();
                if !state.owns(&conn) || !conn.is_stale(cutoff) {
                    continue;
                }
                Self::remove_locked(&mut state, &conn);
            }
            tracing::warn!(
                database = %self.inner.config.database,
                connection_id = conn.id(),
                owner = ?conn.owner(),
                "reaping abandoned connection"
            );
            conn.disconnect();
            reaped += 1;
        }

        if reaped > 0 {
            self.replenish();
            let mut metrics = self.inner.metrics.lock();
            metrics.connections_reaped += reaped as u64;
            metrics.connections_closed += reaped as u64;
        }
        reaped
    }

    /// Close every connection and forget every reservation.
    ///
    /// Leased connections are closed too; their owners' later checkins are
    /// ignored. Closing waits for owners currently holding a session lock.
    pub fn disconnect_all(&self) {
        let connections = {
            let mut state = self.inner.state.lock();
            state.reserved.clear();
            state.reserved_by_connection.clear();
            state.available.clear();
            let connections = std::mem::take(&mut state.connections);
            for conn in &connections {
                conn.expire();
            }
            connections
        };

        for conn in &connections {
            conn.disconnect();
        }
        self.inner.metrics.lock().connections_closed += connections.len() as u64;
        self.replenish();

        tracing::info!(
            database = %self.inner.config.database,
            closed = connections.len(),
            "disconnected all connections"
        );
    }

    /// Close every idle connection not already promised to a waiter.
    pub fn flush_idle(&self) -> usize {
        let idle = {
            let mut state = self.inner.state.lock();
            let mut idle = Vec::new();
            while let Some(conn) = state.available.try_poll() {
                idle.push(conn);
            }
            state
                .connections
                .retain(|conn| !idle.iter().any(|flushed| Arc::ptr_eq(flushed, conn)));
            idle
        };

        for conn in &idle {
            conn.disconnect();
        }
        self.inner.metrics.lock().connections_closed += idle.len() as u64;

        tracing::debug!(
            database = %self.inner.config.database,
            flushed = idle.len(),
            "flushed idle connections"
        );
        idle.len()
    }

    /// Check every connection in and close those whose adapter requires
    /// reloading.
    ///
    /// Survivors become idle. Connections whose session is locked are kept.
    pub fn clear_reloadable_connections(&self) {
        let reloadable = {
            let mut state = self.inner.state.lock();
            state.reserved.clear();
            state.reserved_by_connection.clear();
            state.available.clear();

            let (reloadable, keep): (Vec<_>, Vec<_>) =
                std::mem::take(&mut state.connections)
                    .into_iter()
                    .partition(|conn| {
                        conn.try_session()
                            .is_some_and(|session| session.driver().requires_reloading())
                    });

            for conn in &keep {
                conn.expire();
                state.available.add(Arc::clone(conn));
            }
            state.connections = keep;
            for conn in &reloadable {
                conn.expire();
            }
            reloadable
        };

        for conn in &reloadable {
            conn.disconnect();
        }
        self.inner.metrics.lock().connections_closed += reloadable.len() as u64;

        tracing::debug!(
            database = %self.inner.config.database,
            closed = reloadable.len(),
            "cleared reloadable connections"
        );
    }

    /// Whether the pool holds any connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.inner.state.lock().connections.is_empty()
    }

    /// Whether new physical connections may be opened.
    #[must_use]
    pub fn automatic_reconnect(&self) -> bool {
        self.inner.state.lock().automatic_reconnect
    }

    /// Allow or forbid opening new physical connections.
    pub fn set_automatic_reconnect(&self, enabled: bool) {
        self.inner.state.lock().automatic_reconnect = enabled;
    }

    /// Whether a background reaper is running for this pool.
    #[must_use]
    pub fn is_reaping(&self) -> bool {
        self.inner
            .reaper
            .lock()
            .as_ref()
            .is_some_and(Reaper::is_running)
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        let in_use = state.connections.iter().filter(|c| c.in_use()).count();
        PoolStatus {
            available: state.available.len(),
            in_use,
            total: state.connections.len(),
            max: self.inner.config.pool_size,
            waiting: state.available.num_waiting(),
            pending: state.pending,
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            connections_reaped: inner.connections_reaped,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            verifications_performed: inner.verifications_performed,
            verifications_failed: inner.verifications_failed,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Every connection the pool owns, leased or idle.
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<Connection<A>>> {
        self.inner.state.lock().connections.clone()
    }

    fn checkout_from(&self, start: Instant) -> Result<Arc<Connection<A>>> {
        let mut attempts = 0;

        loop {
            attempts += 1;
            let conn = match self.acquire(start) {
                Ok(conn) => conn,
                Err(e) => {
                    self.inner.metrics.lock().checkouts_failed += 1;
                    return Err(e);
                }
            };

            self.inner.metrics.lock().verifications_performed += 1;
            match conn.verify() {
                Ok(()) => {
                    self.inner.metrics.lock().checkouts_successful += 1;
                    tracing::debug!(connection_id = conn.id(), "checked out connection");
                    return Ok(conn);
                }
                Err(e) => {
                    tracing::warn!(
                        database = %self.inner.config.database,
                        connection_id = conn.id(),
                        error = %e,
                        "connection failed verification, replacing it"
                    );
                    self.remove(&conn);
                    conn.disconnect();
                    {
                        let mut metrics = self.inner.metrics.lock();
                        metrics.verifications_failed += 1;
                        metrics.connections_closed += 1;
                    }
                    if attempts > self.inner.config.pool_size {
                        self.inner.metrics.lock().checkouts_failed += 1;
                        return Err(PoolError::Driver(e));
                    }
                }
            }
        }
    }

    /// Lease an idle connection, open a new one, or wait for one to be
    /// checked in before the deadline measured from `start`.
    fn acquire(&self, start: Instant) -> Result<Arc<Connection<A>>> {
        let timeout = self.inner.config.checkout_timeout;
        let mut state = self.inner.state.lock();

        if let Some(conn) = state.available.try_poll() {
            conn.lease();
            return Ok(conn);
        }

        if state.has_capacity(self.inner.config.pool_size) {
            if !state.automatic_reconnect {
                return Err(PoolError::ConnectionNotEstablished(format!(
                    "automatic reconnect is disabled for database '{}'",
                    self.inner.config.database
                )));
            }
            state.pending += 1;
            drop(state);
            return self.open_connection(false);
        }

        let remaining = timeout.saturating_sub(start.elapsed());
        match WaitQueue::wait_poll(&mut state, available, remaining) {
            Ok(conn) => {
                conn.lease();
                Ok(conn)
            }
            Err(PoolError::Timeout { .. }) => {
                tracing::debug!(
                    database = %self.inner.config.database,
                    requested_ms = timeout.as_millis() as u64,
                    "checkout timed out"
                );
                Err(PoolError::Timeout {
                    requested: timeout,
                    elapsed: start.elapsed(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Open a connection into a slot already counted in `pending`.
    ///
    /// The new connection is queued for waiters when `for_waiters` is set and
    /// leased to the caller otherwise.
    fn open_connection(&self, for_waiters: bool) -> Result<Arc<Connection<A>>> {
        let database = &self.inner.config.database;
        let connected = self.inner.factory.connect(&self.inner.config);

        let mut state = self.inner.state.lock();
        state.pending -= 1;
        if for_waiters {
            state.pending_for_waiters -= 1;
        }

        let mut adapter = match connected {
            Ok(adapter) => adapter,
            Err(e) => {
                drop(state);
                if !for_waiters {
                    self.replenish();
                }
                return Err(PoolError::ConnectionNotEstablished(format!(
                    "could not connect to database '{database}': {e}"
                )));
            }
        };

        if !state.automatic_reconnect {
            drop(state);
            adapter.disconnect();
            return Err(PoolError::ConnectionNotEstablished(format!(
                "automatic reconnect was disabled for database '{database}' while connecting"
            )));
        }

        let conn = Arc::new(Connection::new(self.next_connection_id(), adapter));
        state.connections.push(Arc::clone(&conn));
        if for_waiters {
            state.available.add(Arc::clone(&conn));
        } else {
            conn.lease();
        }
        let total = state.connections.len();
        drop(state);
        self.inner.metrics.lock().connections_created += 1;

        tracing::debug!(
            database = %database,
            connection_id = conn.id(),
            total = total,
            "opened new connection"
        );
        Ok(conn)
    }

    fn checkin_locked(state: &mut PoolState<A>, conn: &Arc<Connection<A>>) {
        if !state.owns(conn) {
            tracing::debug!(connection_id = conn.id(), "ignoring checkin of connection not in pool");
            return;
        }
        if state.available.contains(conn) {
            tracing::debug!(connection_id = conn.id(), "ignoring checkin of idle connection");
            return;
        }

        if let Some(session) = conn.try_session() {
            let open = session.open_transactions();
            if open > 0 {
                tracing::warn!(
                    connection_id = conn.id(),
                    open_transactions = open,
                    "connection checked in with an open transaction"
                );
            }
        }

        Self::release_reservation(state, conn);
        conn.expire();
        state.available.add(Arc::clone(conn));
        tracing::trace!(connection_id = conn.id(), "checked in connection");
    }

    fn remove_locked(state: &mut PoolState<A>, conn: &Arc<Connection<A>>) {
        state.connections.retain(|owned| !Arc::ptr_eq(owned, conn));
        state.available.remove(conn);
        Self::release_reservation(state, conn);
        tracing::debug!(
            connection_id = conn.id(),
            total = state.connections.len(),
            "removed connection from pool"
        );
    }

    /// Open connections for blocked waiters while below capacity.
    ///
    /// Must be called without the pool lock held.
    fn replenish(&self) {
        loop {
            {
                let mut state = self.inner.state.lock();
                let owed = state.available.num_waiting();
                if !state.automatic_reconnect
                    || owed <= state.available.len() + state.pending_for_waiters
                    || !state.has_capacity(self.inner.config.pool_size)
                {
                    return;
                }
                state.pending += 1;
                state.pending_for_waiters += 1;
            }
            if let Err(e) = self.open_connection(true) {
                tracing::warn!(error = %e, "failed to open replacement connection");
                return;
            }
        }
    }

    fn release_reservation(state: &mut PoolState<A>, conn: &Connection<A>) {
        if let Some(owner) = state.reserved_by_connection.remove(&conn.id()) {
            state.reserved.remove(&owner);
        }
    }

    /// Generate a new unique connection ID.
    fn next_connection_id(&self) -> u64 {
        self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl<A: Adapter> Clone for Pool<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Adapter> std::fmt::Debug for Pool<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("database", &self.inner.config.database)
            .field("status", &self.status())
            .finish()
    }
}

/// Builder for creating a connection pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::builder()
///     .pool_size(10)
///     .checkout_timeout(Duration::from_secs(1))
///     .build(factory)?;
/// ```
pub struct PoolBuilder {
    pool_config: PoolConfig,
}

impl PoolBuilder {
    /// Create a new pool builder with default settings.
    pub fn new() -> Self {
        Self {
            pool_config: PoolConfig::default(),
        }
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the logical database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.pool_config.database = database.into();
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_config.pool_size = size;
        self
    }

    /// Set the checkout timeout.
    #[must_use]
    pub fn checkout_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.checkout_timeout = timeout;
        self
    }

    /// Set how long a leased connection may sit unused before it can be
    /// reaped.
    #[must_use]
    pub fn dead_connection_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.dead_connection_timeout = timeout;
        self
    }

    /// Run the reaper at the given frequency.
    #[must_use]
    pub fn reaping_frequency(mut self, frequency: Duration) -> Self {
        self.pool_config.reaping_frequency = Some(frequency);
        self
    }

    /// Build the pool.
    pub fn build<A: Adapter>(self, factory: impl ConnectionFactory<A>) -> Result<Pool<A>> {
        Pool::new(self.pool_config, factory)
    }
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: usize,
    /// Number of connections currently in use.
    pub in_use: usize,
    /// Total number of connections.
    pub total: usize,
    /// Maximum allowed connections.
    pub max: usize,
    /// Number of callers blocked waiting for a connection.
    pub waiting: usize,
    /// Connections currently being opened.
    pub pending: usize,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total connections created since pool start.
    pub connections_created: u64,
    /// Total connections closed since pool start.
    pub connections_closed: u64,
    /// Connections closed by the reaper.
    pub connections_reaped: u64,
    /// Successful connection checkouts.
    pub checkouts_successful: u64,
    /// Failed connection checkouts (timeouts, connect failures).
    pub checkouts_failed: u64,
    /// Checkout verifications performed.
    pub verifications_performed: u64,
    /// Verifications that found a dead session.
    pub verifications_failed: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }

    /// Calculate verification success rate (0.0 to 1.0).
    #[must_use]
    pub fn verification_success_rate(&self) -> f64 {
        if self.verifications_performed == 0 {
            return 1.0;
        }
        let successful = self.verifications_performed - self.verifications_failed;
        successful as f64 / self.verifications_performed as f64
    }
}

/// A connection checked out with [`Pool::get`].
///
/// When dropped, the connection is automatically returned to the pool.
/// Use [`detach()`](PooledConnection::detach) to take it out of the pool
/// instead.
pub struct PooledConnection<A: Adapter> {
    conn: Option<Arc<Connection<A>>>,
    pool: Pool<A>,
}

impl<A: Adapter> PooledConnection<A> {
    /// The shared handle to the connection.
    #[must_use]
    pub fn connection(&self) -> Option<&Arc<Connection<A>>> {
        self.conn.as_ref()
    }

    /// Detach the connection from the pool.
    ///
    /// The connection is removed from the pool without being closed and will
    /// not be returned on drop.
    pub fn detach(mut self) -> Option<Arc<Connection<A>>> {
        let conn = self.conn.take()?;
        self.pool.remove(&conn);
        Some(conn)
    }
}

impl<A: Adapter> std::ops::Deref for PooledConnection<A> {
    type Target = Connection<A>;

    fn deref(&self) -> &Self::Target {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("connection is only taken by detach, which consumes self"),
        }
    }
}

impl<A: Adapter> Drop for PooledConnection<A> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::trace!(connection_id = conn.id(), "returning connection to pool");
            self.pool.checkin(&conn);
        }
    }
}
