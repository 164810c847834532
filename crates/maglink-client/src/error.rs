//! The typed gateway error taxonomy.
//!
//! Non-2xx responses carry the vendor header `x-ca-err`, a numeric code
//! whose value selects the failure class. [`ServerError::classify`] is the
//! single, closed mapping from `(status, code, body)` to a variant; there
//! is no open-ended construction path.

use std::time::Duration;

use thiserror::Error;

use maglink_core::codes;

use crate::wire::GatewayResponse;

/// A result type using `ServerError`.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Response header carrying the OTP delivery channels.
pub const OTP_CHANNELS_HEADER: &str = "x-otp-channels";
/// Response header carrying the remaining OTP retry count.
pub const OTP_RETRY_HEADER: &str = "x-otp-retry";
/// Response header carrying the OTP retry interval in seconds.
pub const OTP_RETRY_INTERVAL_HEADER: &str = "x-otp-retry-interval";

/// The vendor error header.
pub const ERROR_CODE_HEADER: &str = "x-ca-err";

/// What an OTP challenge is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpKind {
    /// A passcode must be supplied.
    Required,
    /// The supplied passcode was wrong.
    Invalid,
    /// The supplied passcode has expired.
    Expired,
    /// Too many attempts; the flow is suspended.
    Suspended,
}

impl OtpKind {
    /// Map an OTP-range vendor code to its challenge kind.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            8_000_140 => Some(Self::Required),
            8_000_141 | 8_000_144 => Some(Self::Invalid),
            8_000_142 => Some(Self::Expired),
            8_000_143 | 8_000_145 => Some(Self::Suspended),
            _ => None,
        }
    }
}

/// A structured one-time-passcode challenge.
///
/// Not strictly an error: the expected caller action is "collect more
/// input", so the challenge carries everything needed to drive that:
/// delivery channels and retry metadata from the response headers.
#[derive(Debug, Clone)]
pub struct OtpChallenge {
    /// What the challenge asks for.
    pub kind: OtpKind,
    /// The raw vendor code.
    pub error_code: i64,
    /// HTTP status of the challenge response.
    pub http_status: u16,
    /// Channels the passcode can be delivered over.
    pub channels: Vec<String>,
    /// Remaining attempts, when the gateway reports one.
    pub retry_count: Option<u32>,
    /// Wait between attempts, when the gateway reports one.
    pub retry_interval: Option<Duration>,
}

impl OtpChallenge {
    fn from_response(kind: OtpKind, code: i64, response: &GatewayResponse) -> Self {
        let channels = response
            .header(OTP_CHANNELS_HEADER)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            kind,
            error_code: code,
            http_status: response.status,
            channels,
            retry_count: response
                .header(OTP_RETRY_HEADER)
                .and_then(|v| v.parse().ok()),
            retry_interval: response
                .header(OTP_RETRY_INTERVAL_HEADER)
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs),
        }
    }
}

/// Errors raised by the gateway protocol layer.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The client certificate has expired; the device may renew it.
    #[error("client certificate expired (code {code}, HTTP {status})")]
    CertificateExpired {
        /// Vendor error code.
        code: i64,
        /// HTTP status.
        status: u16,
    },

    /// The dynamic client credentials are unknown or revoked.
    #[error("invalid client credentials (code {code}, HTTP {status})")]
    InvalidClientCredentials {
        /// Vendor error code.
        code: i64,
        /// HTTP status.
        status: u16,
    },

    /// The gateway no longer recognizes this device identifier.
    #[error("unknown device identifier (code {code}, HTTP {status})")]
    InvalidMagIdentifier {
        /// Vendor error code.
        code: i64,
        /// HTTP status.
        status: u16,
    },

    /// A one-time-passcode challenge.
    #[error("one-time passcode challenge: {0:?}")]
    Otp(OtpChallenge),

    /// The gateway requires a mobile number and none was supplied.
    #[error("mobile number required (HTTP {status})")]
    MobileNumberRequired {
        /// HTTP status (449).
        status: u16,
    },

    /// The supplied mobile number was rejected.
    #[error("mobile number invalid (HTTP {status})")]
    MobileNumberInvalid {
        /// HTTP status (448).
        status: u16,
    },

    /// Certificate renewal was refused; the device must re-register.
    #[error("device certificate renewal refused (HTTP {status})")]
    DeviceRenewalFailed {
        /// Vendor error code, -1 if absent.
        code: i64,
        /// HTTP status.
        status: u16,
    },

    /// Device registration was refused.
    #[error("device registration failed (code {code}, HTTP {status}): {message}")]
    RegistrationFailed {
        /// Vendor error code, -1 if absent.
        code: i64,
        /// HTTP status.
        status: u16,
        /// Response body text.
        message: String,
    },

    /// Any other non-2xx protocol failure.
    #[error("gateway error (code {code}, HTTP {status}): {message}")]
    Protocol {
        /// Vendor error code, -1 if absent.
        code: i64,
        /// HTTP status.
        status: u16,
        /// The response content type.
        content_type: Option<String>,
        /// Response body text.
        message: String,
    },

    /// A 2xx response whose body or headers could not be decoded.
    #[error("malformed gateway response: {0}")]
    Decode(String),

    /// The request never completed.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ServerError {
    /// The vendor error code carried by this error, -1 when absent.
    #[must_use]
    pub const fn error_code(&self) -> i64 {
        match self {
            Self::CertificateExpired { code, .. }
            | Self::InvalidClientCredentials { code, .. }
            | Self::InvalidMagIdentifier { code, .. }
            | Self::DeviceRenewalFailed { code, .. }
            | Self::RegistrationFailed { code, .. }
            | Self::Protocol { code, .. } => *code,
            Self::Otp(challenge) => challenge.error_code,
            Self::MobileNumberRequired { .. }
            | Self::MobileNumberInvalid { .. }
            | Self::Decode(_)
            | Self::Transport(_) => codes::NO_ERROR_CODE,
        }
    }

    /// The HTTP status this error was decoded from, if any.
    #[must_use]
    pub const fn http_status(&self) -> Option<u16> {
        match self {
            Self::CertificateExpired { status, .. }
            | Self::InvalidClientCredentials { status, .. }
            | Self::InvalidMagIdentifier { status, .. }
            | Self::DeviceRenewalFailed { status, .. }
            | Self::RegistrationFailed { status, .. }
            | Self::Protocol { status, .. }
            | Self::MobileNumberRequired { status }
            | Self::MobileNumberInvalid { status } => Some(*status),
            Self::Otp(challenge) => Some(challenge.http_status),
            Self::Decode(_) | Self::Transport(_) => None,
        }
    }

    /// Classify a non-2xx response into its typed variant.
    ///
    /// MSISDN policy failures (448/449) are deliberately NOT mapped here:
    /// they are only meaningful when the telephony policy is enabled, so
    /// the telephony assertion maps them via [`msisdn_failure`]. Without
    /// it they fall through to [`ServerError::Protocol`].
    #[must_use]
    pub fn classify(response: &GatewayResponse) -> Self {
        let code = find_error_code(response);
        if let Some(kind) = OtpKind::from_code(code) {
            return Self::Otp(OtpChallenge::from_response(kind, code, response));
        }
        if codes::is_certificate_expired(code) {
            return Self::CertificateExpired {
                code,
                status: response.status,
            };
        }
        if codes::is_invalid_client(code) {
            return Self::InvalidClientCredentials {
                code,
                status: response.status,
            };
        }
        if codes::is_invalid_mag_identifier(code) {
            return Self::InvalidMagIdentifier {
                code,
                status: response.status,
            };
        }
        Self::Protocol {
            code,
            status: response.status,
            content_type: response.content_type().map(ToString::to_string),
            message: response.body_text(),
        }
    }
}

/// Decode the vendor error code from a response.
///
/// Returns -1 when the header is absent, unparsable, or the status is
/// `405 Method Not Allowed`. A 405 is a framework-level rejection, so
/// whatever the header says there is not gateway policy.
#[must_use]
pub fn find_error_code(response: &GatewayResponse) -> i64 {
    if response.status == 405 {
        return codes::NO_ERROR_CODE;
    }
    response
        .header(ERROR_CODE_HEADER)
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(codes::NO_ERROR_CODE)
}

/// Map an MSISDN policy failure, if this response is one.
///
/// Only the telephony assertion calls this; a gateway that returns
/// 448/449 while the policy is disabled gets the generic classification
/// instead.
#[must_use]
pub fn msisdn_failure(response: &GatewayResponse) -> Option<ServerError> {
    let body = response.body_text();
    if !body.to_ascii_lowercase().contains("msisdn") {
        return None;
    }
    match response.status {
        448 => Some(ServerError::MobileNumberInvalid {
            status: response.status,
        }),
        449 => Some(ServerError::MobileNumberRequired {
            status: response.status,
        }),
        _ => None,
    }
}
