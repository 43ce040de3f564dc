//! sqlmux-pool — one shared connection pool per connection identity.
//!
//! [`SqlManager::data_source`] parses a connection string into a
//! [`ConnectionIdentity`](sqlmux_core::ConnectionIdentity) and hands back the
//! pool registered for it, building one through the injected
//! [`PoolFactory`] on first use.
//!
//! # Architecture
//!
//! ```text
//! data_source(raw)
//!   → ConnectionIdentity::parse(raw, resolver)
//!   → LoadingCache lookup
//!     → Ready        → clone the shared handle
//!     → Loading      → await the in-flight build
//!     → Absent       → insert Loading, build on the blocking pool, publish
//!
//! invalidate / shutdown / drop
//!   → entry leaves the map → RemovalListener → ManagedPool::close (once)
//! ```

pub mod cache;
pub mod error;
pub mod manager;
pub mod pool;
pub mod settings;

pub use cache::{LoadError, LoadingCache, RemovalCause, RemovalListener};
pub use error::{SqlError, SqlResult};
pub use manager::SqlManager;
pub use pool::{BoxError, ConnectionSource, ManagedPool, PoolFactory};
pub use settings::{DriverProperties, ManagerOptions, PoolSettings};
