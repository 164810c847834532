//! Session orchestration for the maglink gateway SDK.
//!
//! This crate ties the lower layers together into the SDK's public
//! surface: a [`SessionContext`] that registers the device on first use,
//! keeps OAuth tokens fresh, signs protected requests through the policy
//! chain, recovers from gateway-reported session faults exactly once per
//! request, and switches between gateways at runtime without mixing their
//! persisted credentials.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use maglink_client::wire::RequestInfo;
//! use maglink_core::Credentials;
//! use maglink_session::{GatewayConfig, SessionContext};
//! # struct PlatformPki;
//! # impl maglink_session::Pki for PlatformPki {
//! #     fn generate_keypair(&self) -> Result<maglink_session::Keypair, maglink_session::PkiError> { unimplemented!() }
//! #     fn certification_request(&self, _: &maglink_session::Keypair, _: &str) -> Result<Vec<u8>, maglink_session::PkiError> { unimplemented!() }
//! #     fn leaf_public_key(&self, _: &[u8]) -> Result<Vec<u8>, maglink_session::PkiError> { unimplemented!() }
//! # }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = SessionContext::builder()
//!     .gateway(GatewayConfig::new("gw.example.com", 8443, "/mobile", "master-client"))
//!     .credentials(Credentials::password("alice", "pw"))
//!     .pki(Arc::new(PlatformPki))
//!     .build()?;
//!
//! // First protected request registers the device and obtains tokens.
//! let response = session.execute(RequestInfo::get("/protected/profile")).await?;
//! assert!(response.is_success());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod context;
pub mod error;
pub mod manager;
pub mod pki;
pub mod policy;
pub mod registry;
pub mod state;

pub use config::{GatewayConfig, StorageKind, StorageRegistry};
pub use context::{OutboundRequest, SessionContext, SessionContextBuilder};
pub use error::{ConfigError, PkiError, Result, SessionError};
pub use manager::AuthManager;
pub use pki::{Keypair, Pki};
pub use policy::{Assertion, AssertionContext, PolicyChain};
pub use registry::{GatewayEvent, GatewayRegistry};
pub use state::SessionState;
