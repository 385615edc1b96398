//! Registry of pools keyed by role and shard.
//!
//! A manager belongs to one process. Pools hold live sessions that must not
//! be shared with a forked child, so a child asks
//! [`for_process`](PoolManager::for_process) for a manager of its own.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::PoolConfig;
use crate::connection::{Adapter, Connection, ConnectionFactory, OwnerId};
use crate::error::{PoolError, Result};
use crate::pool::Pool;

/// Default role for read-write pools.
pub const WRITING_ROLE: &str = "writing";

/// Default role for read-only pools.
pub const READING_ROLE: &str = "reading";

/// Default shard name.
pub const DEFAULT_SHARD: &str = "default";

/// Identifies a pool within a [`PoolManager`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey {
    /// Role, such as `writing` or `reading`.
    pub role: String,
    /// Shard name.
    pub shard: String,
}

impl PoolKey {
    /// Create a key from a role and shard.
    pub fn new(role: impl Into<String>, shard: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            shard: shard.into(),
        }
    }

    /// The default shard's writing pool.
    #[must_use]
    pub fn writing() -> Self {
        Self::new(WRITING_ROLE, DEFAULT_SHARD)
    }

    /// The default shard's reading pool.
    #[must_use]
    pub fn reading() -> Self {
        Self::new(READING_ROLE, DEFAULT_SHARD)
    }
}

impl Default for PoolKey {
    fn default() -> Self {
        Self::writing()
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.role, self.shard)
    }
}

/// Process-scoped registry of connection pools.
///
/// Cloning a manager yields another handle to the same registry.
pub struct PoolManager<A: Adapter> {
    pid: u32,
    pools: Arc<RwLock<HashMap<PoolKey, Pool<A>>>>,
}

impl<A: Adapter> PoolManager<A> {
    /// Create an empty manager for the current process.
    #[must_use]
    pub fn new() -> Self {
        Self::with_pid(std::process::id())
    }

    fn with_pid(pid: u32) -> Self {
        Self {
            pid,
            pools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Process this manager belongs to.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Get the manager for process `pid`.
    ///
    /// For the owning process this is another handle to this registry. For
    /// any other process it is a new registry with an empty pool for every
    /// key, built from the same configurations and factories.
    pub fn for_process(&self, pid: u32) -> Result<Self> {
        if pid == self.pid {
            return Ok(self.clone());
        }

        let manager = Self::with_pid(pid);
        {
            let pools = self.pools.read();
            let mut fresh = manager.pools.write();
            for (key, pool) in pools.iter() {
                fresh.insert(key.clone(), pool.reestablish()?);
            }
        }
        tracing::info!(parent_pid = self.pid, pid = pid, "re-established pools for process");
        Ok(manager)
    }

    /// Create the pool for `key`, replacing and disconnecting any existing
    /// one.
    pub fn establish(
        &self,
        key: PoolKey,
        config: PoolConfig,
        factory: impl ConnectionFactory<A>,
    ) -> Result<Pool<A>> {
        let pool = Pool::new(config, factory)?;
        let previous = self.pools.write().insert(key.clone(), pool.clone());
        if let Some(previous) = previous {
            tracing::debug!(key = %key, "replacing existing pool");
            previous.set_automatic_reconnect(false);
            previous.disconnect_all();
        }
        tracing::info!(key = %key, database = %pool.config().database, "established pool");
        Ok(pool)
    }

    /// Get the pool for `key`.
    pub fn retrieve(&self, key: &PoolKey) -> Result<Pool<A>> {
        self.pools.read().get(key).cloned().ok_or_else(|| {
            PoolError::ConnectionNotEstablished(format!("no connection pool for '{key}'"))
        })
    }

    /// Get `owner`'s connection from the pool for `key`.
    pub fn retrieve_connection(&self, key: &PoolKey, owner: OwnerId) -> Result<Arc<Connection<A>>> {
        self.retrieve(key)?.connection_for(owner)
    }

    /// Whether the pool for `key` exists and holds any connection.
    #[must_use]
    pub fn is_connected(&self, key: &PoolKey) -> bool {
        self.pools
            .read()
            .get(key)
            .is_some_and(|pool| pool.is_connected())
    }

    /// Remove the pool for `key`, disconnect it, and return its
    /// configuration.
    ///
    /// Handles to the removed pool stay valid but can no longer open
    /// connections.
    pub fn remove(&self, key: &PoolKey) -> Option<PoolConfig> {
        let pool = self.pools.write().remove(key)?;
        pool.set_automatic_reconnect(false);
        pool.disconnect_all();
        tracing::info!(key = %key, "removed pool");
        Some(pool.config().clone())
    }

    /// Release `owner`'s lease in every pool.
    pub fn clear_active_connections(&self, owner: OwnerId) {
        for pool in self.pools() {
            pool.release_connection(owner);
        }
    }

    /// Clear reloadable connections in every pool.
    pub fn clear_reloadable_connections(&self) {
        for pool in self.pools() {
            pool.clear_reloadable_connections();
        }
    }

    /// Disconnect every pool.
    pub fn clear_all_connections(&self) {
        for pool in self.pools() {
            pool.disconnect_all();
        }
    }

    /// Close idle connections in every pool.
    pub fn flush_idle_connections(&self) -> usize {
        self.pools().iter().map(Pool::flush_idle).sum()
    }

    /// Keys of every registered pool, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<PoolKey> {
        let mut keys: Vec<_> = self.pools.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of registered pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.read().len()
    }

    /// Whether no pool is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.read().is_empty()
    }

    /// Snapshot of the registered pools, taken so that pool operations run
    /// without the registry lock.
    fn pools(&self) -> Vec<Pool<A>> {
        self.pools.read().values().cloned().collect()
    }
}

impl<A: Adapter> Default for PoolManager<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Adapter> Clone for PoolManager<A> {
    fn clone(&self) -> Self {
        Self {
            pid: self.pid,
            pools: Arc::clone(&self.pools),
        }
    }
}

impl<A: Adapter> fmt::Debug for PoolManager<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolManager")
            .field("pid", &self.pid)
            .field("pools", &self.keys())
            .finish()
    }
}
