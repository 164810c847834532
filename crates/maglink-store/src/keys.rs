//! Key layout for the token store.
//!
//! Every persisted field is stored under the gateway identity's rendered
//! form concatenated with one of the suffixes below. The suffixes are part
//! of the persisted-state contract: changing one orphans previously stored
//! values.

use maglink_core::GatewayIdentity;

/// OAuth access token.
pub const ACCESS_TOKEN: &str = "PREF_ACCESS_TOKEN";
/// OAuth refresh token.
pub const REFRESH_TOKEN: &str = "PREF_REFRESH_TOKEN";
/// Access-token expiry, epoch milliseconds rendered in ASCII decimal.
pub const TOKEN_EXPIRY: &str = "PREF_TOKEN_EXPIRY";
/// Dynamic client id issued by the gateway.
pub const CLIENT_ID: &str = "PREF_CLIENT_ID";
/// Dynamic client secret issued by the gateway.
pub const CLIENT_SECRET: &str = "PREF_CLIENT_SECRET";
/// Dynamic client expiration, epoch milliseconds in ASCII decimal.
pub const CLIENT_EXPIRE_TIME: &str = "PREF_CLIENT_EXPIRE_TIME";
/// Master client id the dynamic credentials were minted under.
pub const MASTER_CLIENT_ID: &str = "PREF_MASTER_CLIENT_ID";
/// Server-issued device instance identifier.
pub const MAG_IDENTIFIER: &str = "PREF_MAG_IDENTIFIER";
/// Client certificate chain, PEM.
pub const CERT_CHAIN: &str = "PREF_CERT_CHAIN";
/// Client private key, PKCS#8 DER.
pub const PRIVATE_KEY: &str = "PREF_PRIVATE_KEY";

/// All field suffixes, in the order a full wipe removes them.
pub const ALL_FIELDS: &[&str] = &[
    ACCESS_TOKEN,
    REFRESH_TOKEN,
    TOKEN_EXPIRY,
    CLIENT_ID,
    CLIENT_SECRET,
    CLIENT_EXPIRE_TIME,
    MASTER_CLIENT_ID,
    MAG_IDENTIFIER,
    CERT_CHAIN,
    PRIVATE_KEY,
];

/// Build the storage key for `field` under `gateway`'s namespace.
#[must_use]
pub fn namespaced(gateway: &GatewayIdentity, field: &str) -> String {
    format!("{gateway}{field}")
}

/// True if `key` belongs to the maglink layout (any gateway).
#[must_use]
pub fn is_maglink_key(key: &str) -> bool {
    ALL_FIELDS.iter().any(|field| key.ends_with(field))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(host: &str) -> GatewayIdentity {
        GatewayIdentity::new(host, 8443, "/mobile").unwrap()
    }

    #[test]
    fn namespaced_prepends_identity() {
        let key = namespaced(&gateway("gw.example.com"), ACCESS_TOKEN);
        assert_eq!(key, "https://gw.example.com:8443/mobilePREF_ACCESS_TOKEN");
    }

    #[test]
    fn distinct_gateways_never_share_keys() {
        let a = gateway("gw-a.example.com");
        let b = gateway("gw-b.example.com");
        for field in ALL_FIELDS {
            assert_ne!(namespaced(&a, field), namespaced(&b, field));
        }
    }

    #[test]
    fn layout_membership() {
        let key = namespaced(&gateway("gw"), PRIVATE_KEY);
        assert!(is_maglink_key(&key));
        assert!(!is_maglink_key("unrelated-key"));
    }
}
