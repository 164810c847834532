//! Gateway protocol client for the maglink SDK.
//!
//! This crate speaks the gateway's device and token endpoints and nothing
//! else: it encodes high-level operations as signed HTTP requests, decodes
//! responses (PEM certificate chains, JSON token grants), and maps the
//! vendor `x-ca-err` header onto a closed, typed error taxonomy.
//!
//! The client classifies and throws. It never retries and never recovers;
//! recovery policy belongs to the session layer.
//!
//! # Endpoints
//!
//! | Operation                  | Route                             |
//! |----------------------------|-----------------------------------|
//! | Token grant / refresh      | `POST /auth/oauth/v2/token`       |
//! | Device registration        | `POST /connect/device/register`   |
//! | App-only registration      | `POST /connect/device/register/client` |
//! | Certificate renewal        | `PUT /connect/device/renew`       |
//! | Client-credentials init    | `POST /connect/client/initialize` |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod error;
pub mod wire;

pub use client::{ClientOptions, GatewayClient};
pub use error::{find_error_code, msisdn_failure, OtpChallenge, OtpKind, Result, ServerError};
pub use wire::{
    ClientAuth, DeviceMetadata, DeviceRegistration, GatewayResponse, RequestInfo, TokenGrant,
};
