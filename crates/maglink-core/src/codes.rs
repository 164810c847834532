//! Vendor error codes.
//!
//! The gateway reports policy failures through the `x-ca-err` response
//! header: a numeric code whose trailing three digits (and, for OTP, whole
//! value) select the failure class. These helpers are the single place that
//! knowledge lives.

use std::ops::RangeInclusive;

/// Sentinel for "no decodable error code on this response".
pub const NO_ERROR_CODE: i64 = -1;

/// Codes signalling the one-time-passcode challenge flow.
pub const OTP_CODES: RangeInclusive<i64> = 8_000_140..=8_000_145;

/// Trailing-digit suffix for an unknown or revoked client credential.
pub const SUFFIX_INVALID_CLIENT: i64 = 201;

/// Trailing-digit suffix for a device identifier the gateway no longer
/// recognizes (server/device state desync).
pub const SUFFIX_INVALID_MAG_IDENTIFIER: i64 = 107;

/// Trailing-digit suffix for an expired client certificate.
pub const SUFFIX_CERTIFICATE_EXPIRED: i64 = 206;

/// True if `code` is in the OTP challenge range.
#[must_use]
pub fn is_otp(code: i64) -> bool {
    OTP_CODES.contains(&code)
}

/// True if `code` reports invalid client credentials.
#[must_use]
pub const fn is_invalid_client(code: i64) -> bool {
    code > 0 && code % 1000 == SUFFIX_INVALID_CLIENT
}

/// True if `code` reports an unknown device identifier.
#[must_use]
pub const fn is_invalid_mag_identifier(code: i64) -> bool {
    code > 0 && code % 1000 == SUFFIX_INVALID_MAG_IDENTIFIER
}

/// True if `code` reports an expired client certificate.
#[must_use]
pub const fn is_certificate_expired(code: i64) -> bool {
    code > 0 && code % 1000 == SUFFIX_CERTIFICATE_EXPIRED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otp_range() {
        assert!(is_otp(8_000_140));
        assert!(is_otp(8_000_145));
        assert!(!is_otp(8_000_146));
        assert!(!is_otp(140));
    }

    #[test]
    fn suffix_predicates() {
        assert!(is_invalid_client(3_003_201));
        assert!(is_invalid_client(201));
        assert!(!is_invalid_client(3_003_202));

        assert!(is_invalid_mag_identifier(1_000_107));
        assert!(!is_invalid_mag_identifier(1_000_108));

        assert!(is_certificate_expired(1_000_206));
        assert!(!is_certificate_expired(1_000_207));
    }

    #[test]
    fn sentinel_matches_nothing() {
        assert!(!is_invalid_client(NO_ERROR_CODE));
        assert!(!is_invalid_mag_identifier(NO_ERROR_CODE));
        assert!(!is_certificate_expired(NO_ERROR_CODE));
        assert!(!is_otp(NO_ERROR_CODE));
    }
}
