//! Per-gateway credential and token storage.
//!
//! This crate persists everything a device accumulates against a gateway
//! (OAuth tokens, dynamic client credentials, the device identifier, and the
//! client certificate with its private key) through an injected key-value
//! [`DataSource`]. The concrete backend (platform keystore, OS credential
//! vault, encrypted file) is an external collaborator; only the contract
//! lives here, plus an in-memory default used as the fallback backend and
//! in tests.
//!
//! # Namespacing
//!
//! Every key is the gateway identity's rendered form concatenated with a
//! field suffix, so any number of gateways coexist in one backend without
//! collision:
//!
//! ```text
//! https://gw-a.example.com:8443/mobilePREF_ACCESS_TOKEN   (gateway A)
//! https://gw-b.example.com:8443/mobilePREF_ACCESS_TOKEN   (gateway B)
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use chrono::{Duration, Utc};
//! use maglink_core::GatewayIdentity;
//! use maglink_store::{MemoryDataSource, TokenStore};
//!
//! let source = Arc::new(MemoryDataSource::new());
//! let gateway = GatewayIdentity::new("gw.example.com", 8443, "/mobile").unwrap();
//! let store = TokenStore::new(&gateway, source);
//!
//! store.save_tokens("at", "rt", Utc::now() + Duration::hours(1)).unwrap();
//! assert_eq!(store.access_token().unwrap().as_deref(), Some("at"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod memory;
pub mod pem;
pub mod token_store;

pub use error::{Result, StoreError};
pub use memory::MemoryDataSource;
pub use token_store::{ClientCredentialsRecord, TokenRecord, TokenStore};

/// The key-value contract a storage backend must satisfy.
///
/// Implementations must be safe to call from many tasks at once. A backend
/// that is temporarily locked (device keystore before first unlock, vault
/// awaiting user presence) reports `false` from [`is_ready`](Self::is_ready)
/// and the store surfaces that as a typed, recoverable condition, never as
/// a silent no-op.
pub trait DataSource: Send + Sync {
    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any existing value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn remove(&self, key: &str) -> Result<()>;

    /// List every key currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn list_keys(&self) -> Result<Vec<String>>;

    /// True if the backend is unlocked and usable right now.
    fn is_ready(&self) -> bool;
}
