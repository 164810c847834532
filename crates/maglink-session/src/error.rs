//! Session error types.

use thiserror::Error;

use maglink_client::ServerError;
use maglink_core::{CredentialError, IdentityError};
use maglink_store::StoreError;

/// A result type using `SessionError`.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors that fail SDK construction. Never retried: a broken configuration
/// fails immediately and loudly.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configured gateway identity is malformed.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// A storage backend was named but no factory is registered for it.
    ///
    /// Distinct from an absent storage configuration, which falls back to
    /// the default backend; naming a backend that cannot be produced is a
    /// broken configuration.
    #[error("unknown storage backend: {0:?}")]
    UnknownStorage(String),

    /// A required collaborator was not supplied.
    #[error("missing required configuration: {0}")]
    Missing(&'static str),
}

/// Errors from the injected PKI collaborator.
#[derive(Debug, Error)]
#[error("pki error: {0}")]
pub struct PkiError(pub String);

/// Errors surfaced to session callers.
#[derive(Debug, Error)]
pub enum SessionError {
    /// SDK construction failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The token store refused the operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The gateway refused the operation.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Locally supplied input failed validation before any network call.
    #[error(transparent)]
    Validation(#[from] CredentialError),

    /// The PKI collaborator failed.
    #[error(transparent)]
    Pki(#[from] PkiError),

    /// The request was cancelled by its caller.
    #[error("request cancelled")]
    Cancelled,
}

impl SessionError {
    /// The vendor error code carried by this error, -1 when absent.
    #[must_use]
    pub fn error_code(&self) -> i64 {
        match self {
            Self::Server(err) => err.error_code(),
            _ => maglink_core::codes::NO_ERROR_CODE,
        }
    }
}
