//! Error types for connection string parsing.

use thiserror::Error;

/// Errors raised while turning a connection string into an identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The input does not have the `[jdbc:]scheme:[//][user[:password]@]address` shape.
    #[error("'{0}' is not a valid connection string")]
    Malformed(String),

    /// The string parsed, but no registered driver accepts the address.
    #[error("no registered driver accepts {address}")]
    UnresolvedBackend { address: String },
}
