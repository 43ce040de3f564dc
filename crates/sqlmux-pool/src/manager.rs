//! The pool manager — connection string in, shared pool out.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use sqlmux_core::{BackendResolver, ConnectionIdentity, DriverRegistry, MuxConfig};
use tracing::{debug, info, warn};

use crate::cache::{LoadError, LoadingCache, RemovalCause, RemovalListener};
use crate::error::{SqlError, SqlResult};
use crate::pool::{ConnectionSource, ManagedPool, PoolFactory};
use crate::settings::{ManagerOptions, PoolSettings};

/// Closes pools as they leave the cache.
struct PoolCloser<P>(PhantomData<fn(P)>);

impl<P: ManagedPool> RemovalListener<ConnectionIdentity, Arc<P>> for PoolCloser<P> {
    fn on_removal(&self, identity: ConnectionIdentity, pool: Arc<P>, cause: RemovalCause) {
        if pool.is_closed() {
            debug!(address = %identity, ?cause, "connection pool already closed");
            return;
        }
        match pool.close() {
            Ok(()) => info!(
                address = %identity,
                driver = identity.driver_token(),
                ?cause,
                "closed connection pool"
            ),
            Err(e) => warn!(
                address = %identity,
                ?cause,
                error = %e,
                "connection pool did not close cleanly"
            ),
        }
    }
}

/// Hands out one shared pool per [`ConnectionIdentity`].
///
/// Construct it once at process start and share it. Pools are built
/// lazily through the [`PoolFactory`] and closed when their entry is
/// invalidated, on [`shutdown`](Self::shutdown), or when the manager is
/// dropped. `shutdown` does not disable the manager: a later
/// `data_source` call simply builds a fresh pool.
pub struct SqlManager<F: PoolFactory> {
    resolver: Arc<dyn BackendResolver>,
    factory: Arc<F>,
    options: ManagerOptions,
    cache: LoadingCache<ConnectionIdentity, Arc<F::Pool>, SqlError>,
}

impl<F: PoolFactory> SqlManager<F> {
    pub fn new(resolver: Arc<dyn BackendResolver>, factory: F, options: ManagerOptions) -> Self {
        Self {
            resolver,
            factory: Arc::new(factory),
            options,
            cache: LoadingCache::new(Arc::new(PoolCloser::<F::Pool>(PhantomData))),
        }
    }

    /// Built-in driver registry and default options.
    pub fn with_defaults(factory: F) -> Self {
        Self::new(
            Arc::new(DriverRegistry::builtin()),
            factory,
            ManagerOptions::default(),
        )
    }

    pub fn from_config(config: &MuxConfig, factory: F) -> Self {
        Self::new(
            Arc::new(config.driver_registry()),
            factory,
            ManagerOptions::from_config(config),
        )
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// Parse `raw` with this manager's driver resolver.
    pub fn identify(&self, raw: &str) -> SqlResult<ConnectionIdentity> {
        Ok(ConnectionIdentity::parse(raw, self.resolver.as_ref())?)
    }

    /// The settings a cache miss for `identity` would hand to the factory.
    pub fn pool_settings(&self, identity: &ConnectionIdentity) -> PoolSettings {
        PoolSettings::for_identity(identity, &self.options)
    }

    /// Return the shared pool for `raw`, building it on first use.
    ///
    /// Concurrent calls with the same string wait for a single build and
    /// all receive the same pool, or the same error. A failed build is not
    /// remembered; the next call tries again.
    pub async fn data_source(&self, raw: &str) -> SqlResult<ConnectionSource<F::Pool>> {
        let identity = self.identify(raw)?;
        let address = identity.canonical_address().to_string();

        let pool = self
            .cache
            .try_get_with(identity.clone(), || {
                debug!(address = %identity, "pool cache miss");
                build_pool(Arc::clone(&self.factory), self.pool_settings(&identity))
            })
            .await
            .map_err(|e| match e {
                LoadError::Failed(e) => e,
                LoadError::Invalidated => SqlError::Invalidated { address },
                LoadError::Aborted => SqlError::LoadAborted { address },
            })?;

        Ok(ConnectionSource::new(pool))
    }

    /// Close and forget the pool for `raw`, if there is one. A build still
    /// in flight is closed as soon as it completes.
    pub fn invalidate(&self, raw: &str) -> SqlResult<bool> {
        let identity = self.identify(raw)?;
        Ok(self.cache.invalidate(&identity))
    }

    /// Close every pool. Safe to call more than once.
    pub fn shutdown(&self) {
        let closed = self.cache.invalidate_all();
        info!(closed, "sql manager shut down");
    }

    /// Number of ready pools.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

async fn build_pool<F: PoolFactory>(
    factory: Arc<F>,
    settings: PoolSettings,
) -> SqlResult<Arc<F::Pool>> {
    let address = settings.target.clone();
    info!(
        address = %address,
        driver = %settings.driver_token,
        max_size = settings.max_size,
        leak_detection_threshold = ?settings.leak_detection_threshold,
        "building connection pool"
    );

    let built = tokio::task::spawn_blocking(move || {
        factory.build(&settings).map(Unclaimed::new)
    })
    .await
    .map_err(|e| {
        warn!(address = %address, error = %e, "pool factory panicked");
        SqlError::LoadAborted {
            address: address.clone(),
        }
    })?;

    // Nothing awaits between the claim and the cache settling the pool.
    match built {
        Ok(unclaimed) => unclaimed
            .claim()
            .map(Arc::new)
            .ok_or(SqlError::LoadAborted { address }),
        Err(source) => {
            warn!(address = %address, error = %source, "failed to build connection pool");
            Err(SqlError::PoolConstruction {
                address,
                source: Arc::from(source),
            })
        }
    }
}

/// A freshly built pool, closed on drop unless claimed. The blocking build
/// keeps running when its loader task is cancelled or its runtime is dropped.
struct Unclaimed<P: ManagedPool> {
    pool: Option<P>,
}

impl<P: ManagedPool> Unclaimed<P> {
    fn new(pool: P) -> Self {
        Self { pool: Some(pool) }
    }

    fn claim(mut self) -> Option<P> {
        self.pool.take()
    }
}

impl<P: ManagedPool> Drop for Unclaimed<P> {
    fn drop(&mut self) {
        let Some(pool) = self.pool.take() else {
            return;
        };
        if pool.is_closed() {
            return;
        }
        match pool.close() {
            Ok(()) => warn!("closed connection pool whose build outlived its requester"),
            Err(e) => warn!(error = %e, "orphaned connection pool did not close cleanly"),
        }
    }
}

impl<F: PoolFactory> fmt::Debug for SqlManager<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlManager")
            .field("options", &self.options)
            .field("pools", &self.cache.len())
            .finish_non_exhaustive()
    }
}
