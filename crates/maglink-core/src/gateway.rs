//! Gateway identity.
//!
//! A [`GatewayIdentity`] names one backend gateway. Its rendered form is the
//! namespace under which every credential, token and certificate for that
//! gateway is persisted, so two identities that differ in any field never
//! share stored state.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors constructing a [`GatewayIdentity`] from configuration input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The host component was empty.
    #[error("gateway host must not be empty")]
    EmptyHost,

    /// The port component was zero.
    #[error("gateway port must not be zero")]
    ZeroPort,

    /// The path prefix contained characters that cannot appear in a URI path.
    #[error("invalid gateway path prefix: {0:?}")]
    InvalidPrefix(String),
}

/// The identity of a backend gateway: host, port and URI path prefix.
///
/// Immutable once constructed; a gateway switch replaces the identity
/// wholesale. Equality and hashing cover all three fields, and the
/// [`Display`](fmt::Display) form (`https://host:port/prefix`) is used
/// verbatim as the storage key namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GatewayIdentity {
    host: String,
    port: u16,
    prefix: String,
}

impl GatewayIdentity {
    /// Create a gateway identity.
    ///
    /// The prefix is normalized to start with `/` and not end with one; an
    /// empty prefix is allowed and stays empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is empty, the port is zero, or the
    /// prefix contains whitespace.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        prefix: impl Into<String>,
    ) -> Result<Self, IdentityError> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(IdentityError::EmptyHost);
        }
        if port == 0 {
            return Err(IdentityError::ZeroPort);
        }

        let raw = prefix.into();
        if raw.chars().any(char::is_whitespace) {
            return Err(IdentityError::InvalidPrefix(raw));
        }
        let trimmed = raw.trim_matches('/');
        let prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        };

        Ok(Self { host, port, prefix })
    }

    /// The gateway host name.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The gateway port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// The normalized URI path prefix (leading `/`, no trailing `/`).
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The base URL of this gateway, `https://host:port` plus the prefix.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("https://{}:{}{}", self.host, self.port, self.prefix)
    }
}

impl fmt::Display for GatewayIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_url())
    }
}
