//! Core types for the maglink gateway SDK.
//!
//! This crate provides the foundational types shared by every maglink crate:
//!
//! - **Gateway identity**: the host/port/prefix triple that names a backend
//!   gateway and namespaces everything persisted for it
//! - **Secret material**: string and byte buffers that are scrubbed on drop
//! - **Credentials**: the tagged union of OAuth grant inputs (password,
//!   client credentials, authorization code, bearer assertions)
//! - **Vendor error codes**: the numeric `x-ca-err` ranges the gateway uses
//!   to signal recoverable session faults
//!
//! # Example
//!
//! ```
//! use maglink_core::{Credentials, GatewayIdentity};
//!
//! let gateway = GatewayIdentity::new("gw.example.com", 8443, "/mobile").unwrap();
//! assert_eq!(gateway.to_string(), "https://gw.example.com:8443/mobile");
//!
//! let creds = Credentials::password("alice", "hunter2");
//! assert!(creds.is_valid());
//! assert!(creds.is_reusable());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod codes;
pub mod credentials;
pub mod gateway;
pub mod pkce;
pub mod secret;

pub use credentials::{CredentialError, Credentials};
pub use gateway::{GatewayIdentity, IdentityError};
pub use pkce::VerifierCache;
pub use secret::{SecretBytes, SecretString};
