//! Storage error types.

use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store is locked or otherwise inaccessible. Fatal for the
    /// current request; not retried automatically.
    #[error("token store is not ready")]
    Unavailable,

    /// The backend reported a failure.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored value could not be decoded.
    #[error("corrupt stored value under {key}: {reason}")]
    Corrupt {
        /// The offending key.
        key: String,
        /// What failed to decode.
        reason: String,
    },

    /// Certificate material could not be encoded or decoded.
    #[error(transparent)]
    Pem(#[from] crate::pem::PemError),
}
