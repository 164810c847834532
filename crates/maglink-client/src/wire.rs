//! Wire-level request and response types.

use std::time::Duration;

use maglink_core::SecretString;
use serde::Deserialize;
use uuid::Uuid;

/// Metadata describing the device being registered.
#[derive(Debug, Clone)]
pub struct DeviceMetadata {
    /// Stable device instance id, chosen by the caller.
    pub device_id: String,
    /// Human-readable device name sent to the gateway.
    pub device_name: String,
    /// The device's mobile subscriber number, when the MSISDN policy is in
    /// use on the gateway.
    pub msisdn: Option<String>,
}

impl DeviceMetadata {
    /// Metadata with a random device id and the given name.
    #[must_use]
    pub fn generated(device_name: impl Into<String>) -> Self {
        Self {
            device_id: Uuid::new_v4().to_string(),
            device_name: device_name.into(),
            msisdn: None,
        }
    }
}

/// The client identity used to authenticate token calls: the dynamic
/// client id/secret pair minted by the gateway.
#[derive(Debug, Clone)]
pub struct ClientAuth {
    /// Dynamic client id.
    pub client_id: String,
    /// Dynamic client secret.
    pub client_secret: SecretString,
}

/// Result of a successful device registration.
#[derive(Debug)]
pub struct DeviceRegistration {
    /// The server-issued device instance identifier.
    pub mag_identifier: String,
    /// The issued client certificate chain, DER, leaf first.
    pub certificate_chain: Vec<Vec<u8>>,
}

/// A successful token grant.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    /// The granted access token.
    pub access_token: String,
    /// The granted refresh token.
    pub refresh_token: String,
    /// Seconds until the access token expires.
    pub expires_in: u64,
}

impl TokenGrant {
    /// The grant lifetime as a [`Duration`].
    #[must_use]
    pub const fn lifetime(&self) -> Duration {
        Duration::from_secs(self.expires_in)
    }
}

/// An outbound request against a protected gateway resource.
///
/// The path is relative to the gateway base URL; the policy chain mutates
/// headers before the request is sent.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// HTTP method.
    pub method: reqwest::Method,
    /// Path under the gateway base URL, starting with `/`.
    pub path: String,
    /// Headers, in attach order. Names are matched case-insensitively.
    pub headers: Vec<(String, String)>,
    /// Request body, if any.
    pub body: Option<Vec<u8>>,
}

impl RequestInfo {
    /// A GET request for `path`.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: reqwest::Method::GET,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// A POST request for `path` with the given body.
    #[must_use]
    pub fn post(path: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: reqwest::Method::POST,
            path: path.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Set a header, replacing any existing value with the same name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    /// The current value of a header, if set.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A decoded gateway response.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers with lowercased names.
    pub headers: Vec<(String, String)>,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl GatewayResponse {
    /// True for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// The first value of `name`, matched case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The `content-type` header, if present.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// The body as (lossy) text.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
