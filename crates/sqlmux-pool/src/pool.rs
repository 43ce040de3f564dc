//! Pool abstraction — what the manager builds, hands out, and closes.
//!
//! The manager never borrows or returns connections itself. It only decides
//! which pool backs an identity and when that pool is closed; the pool type
//! is whatever the injected [`PoolFactory`] produces.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::settings::PoolSettings;

/// Boxed error returned by pool implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A closeable connection pool owned by the manager's cache.
pub trait ManagedPool: Send + Sync + 'static {
    /// Release every connection held by the pool.
    ///
    /// Called at most once per pool by the manager.
    fn close(&self) -> Result<(), BoxError>;

    /// Whether the pool has already been closed, by the manager or by
    /// someone holding a handle. Closed pools are skipped on removal.
    fn is_closed(&self) -> bool;
}

/// Builds the pool for one identity.
///
/// `build` runs on tokio's blocking pool, once per identity per cache miss,
/// and may do blocking work such as probing the driver.
pub trait PoolFactory: Send + Sync + 'static {
    type Pool: ManagedPool;

    fn build(&self, settings: &PoolSettings) -> Result<Self::Pool, BoxError>;
}

/// Shared handle to a cached pool.
///
/// Cloning is cheap. The handle does not keep the pool registered: once the
/// entry is invalidated the pool is closed even if handles are still around,
/// so callers should fetch a source per unit of work rather than hold one.
pub struct ConnectionSource<P> {
    pool: Arc<P>,
}

impl<P> ConnectionSource<P> {
    pub(crate) fn new(pool: Arc<P>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<P> {
        &self.pool
    }

    /// Whether both handles point at the same underlying pool.
    pub fn same_pool(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.pool, &other.pool)
    }
}

impl<P> Clone for ConnectionSource<P> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
        }
    }
}

impl<P> Deref for ConnectionSource<P> {
    type Target = P;

    fn deref(&self) -> &P {
        &self.pool
    }
}

impl<P: fmt::Debug> fmt::Debug for ConnectionSource<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionSource").field(&self.pool).finish()
    }
}
