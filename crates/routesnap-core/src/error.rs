//! Error types for routesnap-core

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core errors
#[derive(Debug, Error)]
pub enum Error {
    /// Prefix could not be parsed as a CIDR or host address
    #[error("invalid prefix {prefix:?}: {reason}")]
    InvalidPrefix { prefix: String, reason: String },

    /// Unknown address-family label
    #[error("unknown address family: {0:?}")]
    UnknownAfi(String),

    /// Unknown table kind label
    #[error("unknown table kind: {0:?}")]
    UnknownTableKind(String),
}
