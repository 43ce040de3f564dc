//! Error types for the pool manager.

use std::sync::Arc;

use sqlmux_core::IdentityError;
use thiserror::Error;

/// Result type alias for pool manager operations.
pub type SqlResult<T> = Result<T, SqlError>;

/// Errors surfaced by [`SqlManager`](crate::SqlManager).
///
/// Cloneable so that every caller waiting on the same build receives the
/// same failure.
#[derive(Debug, Clone, Error)]
pub enum SqlError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("failed to build connection pool for {address}: {source}")]
    PoolConstruction {
        address: String,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    #[error("connection pool for {address} was invalidated while it was being built")]
    Invalidated { address: String },

    #[error("connection pool build for {address} terminated without a result")]
    LoadAborted { address: String },
}
