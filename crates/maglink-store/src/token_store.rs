//! The per-gateway token store.
//!
//! One [`TokenStore`] binds a [`GatewayIdentity`] to an injected
//! [`DataSource`] and owns every field the SDK persists for that gateway.
//! Two clearing operations with different blast radius exist on purpose:
//!
//! - [`clear_access_and_refresh_tokens`](TokenStore::clear_access_and_refresh_tokens)
//!   removes only the OAuth pair (logout, invalid-credential recovery)
//! - [`destroy_all_persistent_tokens`](TokenStore::destroy_all_persistent_tokens)
//!   removes every field for the gateway (deregistration, identifier desync)
//!
//! Multi-key writes are made atomic with respect to readers: a reader never
//! observes a fresh access token next to a stale refresh token.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;

use maglink_core::{GatewayIdentity, SecretBytes, SecretString};

use crate::error::{Result, StoreError};
use crate::{keys, pem, DataSource};

/// Dynamic client credentials minted by the gateway, with the master client
/// id they were minted under. Independent lifecycle from the user session.
#[derive(Debug, Clone)]
pub struct ClientCredentialsRecord {
    /// Master (static) client id the dynamic pair was requested with.
    pub master_client_id: String,
    /// Gateway-issued dynamic client id.
    pub client_id: String,
    /// Gateway-issued dynamic client secret.
    pub client_secret: SecretString,
    /// When the dynamic pair expires, if the gateway bounded it.
    pub expires_at: Option<DateTime<Utc>>,
}

impl ClientCredentialsRecord {
    /// True if the dynamic pair has expired.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// True if the pair was minted under `master_client_id`. A changed
    /// master invalidates the stored pair.
    #[must_use]
    pub fn issued_under(&self, master_client_id: &str) -> bool {
        self.master_client_id == master_client_id
    }
}

/// Snapshot of everything persisted for one gateway.
#[derive(Debug)]
pub struct TokenRecord {
    /// OAuth access token.
    pub access_token: Option<String>,
    /// OAuth refresh token.
    pub refresh_token: Option<String>,
    /// Access-token expiry.
    pub access_token_expiry: Option<DateTime<Utc>>,
    /// Dynamic client credentials.
    pub client_credentials: Option<ClientCredentialsRecord>,
    /// Server-issued device identifier.
    pub mag_identifier: Option<String>,
    /// Client certificate chain, DER, leaf first.
    pub certificate_chain: Option<Vec<Vec<u8>>>,
    /// Client private key, PKCS#8 DER.
    pub private_key: Option<SecretBytes>,
}

/// Persisted credential state for a single gateway.
pub struct TokenStore {
    gateway: GatewayIdentity,
    source: Arc<dyn DataSource>,
    // Serializes multi-key writes against readers of paired fields.
    guard: RwLock<()>,
}

impl TokenStore {
    /// Bind `gateway`'s namespace to a storage backend.
    #[must_use]
    pub fn new(gateway: &GatewayIdentity, source: Arc<dyn DataSource>) -> Self {
        Self {
            gateway: gateway.clone(),
            source,
            guard: RwLock::new(()),
        }
    }

    /// The gateway this store is namespaced to.
    #[must_use]
    pub const fn gateway(&self) -> &GatewayIdentity {
        &self.gateway
    }

    /// True if the backing store is unlocked and usable.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.source.is_ready()
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.source.is_ready() {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }

    fn key(&self, field: &str) -> String {
        keys::namespaced(&self.gateway, field)
    }

    fn get_string(&self, field: &str) -> Result<Option<String>> {
        let key = self.key(field);
        match self.source.get(&key)? {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| StoreError::Corrupt {
                    key,
                    reason: "not valid UTF-8".to_string(),
                }),
        }
    }

    fn put_string(&self, field: &str, value: &str) -> Result<()> {
        self.source.put(&self.key(field), value.as_bytes().to_vec())
    }

    fn get_millis(&self, field: &str) -> Result<Option<DateTime<Utc>>> {
        let Some(text) = self.get_string(field)? else {
            return Ok(None);
        };
        let key = self.key(field);
        let millis: i64 = text.parse().map_err(|_| StoreError::Corrupt {
            key: key.clone(),
            reason: format!("not a millisecond timestamp: {text:?}"),
        })?;
        Utc.timestamp_millis_opt(millis)
            .single()
            .map(Some)
            .ok_or(StoreError::Corrupt {
                key,
                reason: "timestamp out of range".to_string(),
            })
    }

    // ------------------------------------------------------------------
    // OAuth token pair
    // ------------------------------------------------------------------

    /// Persist a freshly granted token pair and its expiry.
    ///
    /// The three writes are atomic with respect to readers.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not ready or the backend fails.
    pub fn save_tokens(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_ready()?;
        let _write = self.guard.write();
        self.put_string(keys::ACCESS_TOKEN, access_token)?;
        self.put_string(keys::REFRESH_TOKEN, refresh_token)?;
        self.put_string(keys::TOKEN_EXPIRY, &expires_at.timestamp_millis().to_string())?;
        tracing::debug!(gateway = %self.gateway, "stored token pair");
        Ok(())
    }

    /// The stored access token.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not ready or a value is corrupt.
    pub fn access_token(&self) -> Result<Option<String>> {
        self.ensure_ready()?;
        let _read = self.guard.read();
        self.get_string(keys::ACCESS_TOKEN)
    }

    /// The stored refresh token.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not ready or a value is corrupt.
    pub fn refresh_token(&self) -> Result<Option<String>> {
        self.ensure_ready()?;
        let _read = self.guard.read();
        self.get_string(keys::REFRESH_TOKEN)
    }

    /// When the stored access token expires.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not ready or a value is corrupt.
    pub fn access_token_expiry(&self) -> Result<Option<DateTime<Utc>>> {
        self.ensure_ready()?;
        let _read = self.guard.read();
        self.get_millis(keys::TOKEN_EXPIRY)
    }

    /// True if the stored access token is unusable at `now`: expired, or
    /// stored without an expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not ready or a value is corrupt.
    pub fn is_access_token_expired(&self, now: DateTime<Utc>) -> Result<bool> {
        self.ensure_ready()?;
        let _read = self.guard.read();
        match self.get_millis(keys::TOKEN_EXPIRY)? {
            Some(expiry) => Ok(expiry <= now),
            None => Ok(true),
        }
    }

    /// Remove the OAuth pair and its expiry, leaving client credentials,
    /// device identifier and certificate material untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not ready or the backend fails.
    pub fn clear_access_and_refresh_tokens(&self) -> Result<()> {
        self.ensure_ready()?;
        let _write = self.guard.write();
        self.source.remove(&self.key(keys::ACCESS_TOKEN))?;
        self.source.remove(&self.key(keys::REFRESH_TOKEN))?;
        self.source.remove(&self.key(keys::TOKEN_EXPIRY))?;
        tracing::debug!(gateway = %self.gateway, "cleared token pair");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dynamic client credentials
    // ------------------------------------------------------------------

    /// Persist gateway-issued dynamic client credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not ready or the backend fails.
    pub fn save_client_credentials(&self, record: &ClientCredentialsRecord) -> Result<()> {
        self.ensure_ready()?;
        let _write = self.guard.write();
        self.put_string(keys::MASTER_CLIENT_ID, &record.master_client_id)?;
        self.put_string(keys::CLIENT_ID, &record.client_id)?;
        self.put_string(keys::CLIENT_SECRET, record.client_secret.expose())?;
        match record.expires_at {
            Some(at) => {
                self.put_string(keys::CLIENT_EXPIRE_TIME, &at.timestamp_millis().to_string())?;
            }
            None => self.source.remove(&self.key(keys::CLIENT_EXPIRE_TIME))?,
        }
        Ok(())
    }

    /// The stored dynamic client credentials, if a complete pair exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not ready or a value is corrupt.
    pub fn client_credentials(&self) -> Result<Option<ClientCredentialsRecord>> {
        self.ensure_ready()?;
        let _read = self.guard.read();
        let (Some(client_id), Some(client_secret)) = (
            self.get_string(keys::CLIENT_ID)?,
            self.get_string(keys::CLIENT_SECRET)?,
        ) else {
            return Ok(None);
        };
        Ok(Some(ClientCredentialsRecord {
            master_client_id: self.get_string(keys::MASTER_CLIENT_ID)?.unwrap_or_default(),
            client_id,
            client_secret: SecretString::new(client_secret),
            expires_at: self.get_millis(keys::CLIENT_EXPIRE_TIME)?,
        }))
    }

    /// Remove the dynamic client credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not ready or the backend fails.
    pub fn clear_client_credentials(&self) -> Result<()> {
        self.ensure_ready()?;
        let _write = self.guard.write();
        self.source.remove(&self.key(keys::CLIENT_ID))?;
        self.source.remove(&self.key(keys::CLIENT_SECRET))?;
        self.source.remove(&self.key(keys::CLIENT_EXPIRE_TIME))?;
        self.source.remove(&self.key(keys::MASTER_CLIENT_ID))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Device identity and certificate material
    // ------------------------------------------------------------------

    /// Persist the server-issued device identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not ready or the backend fails.
    pub fn save_mag_identifier(&self, identifier: &str) -> Result<()> {
        self.ensure_ready()?;
        self.put_string(keys::MAG_IDENTIFIER, identifier)
    }

    /// The server-issued device identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not ready or a value is corrupt.
    pub fn mag_identifier(&self) -> Result<Option<String>> {
        self.ensure_ready()?;
        self.get_string(keys::MAG_IDENTIFIER)
    }

    /// Persist the client certificate chain (DER, leaf first) as PEM.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not ready or the backend fails.
    pub fn save_certificate_chain(&self, chain: &[Vec<u8>]) -> Result<()> {
        self.ensure_ready()?;
        self.put_string(keys::CERT_CHAIN, &pem::encode_certificate_chain(chain))
    }

    /// The stored certificate chain, decoded to DER on read.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not ready or the stored PEM is
    /// corrupt.
    pub fn certificate_chain(&self) -> Result<Option<Vec<Vec<u8>>>> {
        self.ensure_ready()?;
        match self.get_string(keys::CERT_CHAIN)? {
            None => Ok(None),
            Some(text) => Ok(Some(pem::decode_certificate_chain(&text)?)),
        }
    }

    /// Persist the client private key (PKCS#8 DER).
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not ready or the backend fails.
    pub fn save_private_key(&self, key_der: &[u8]) -> Result<()> {
        self.ensure_ready()?;
        self.source.put(&self.key(keys::PRIVATE_KEY), key_der.to_vec())
    }

    /// The stored client private key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not ready.
    pub fn private_key(&self) -> Result<Option<SecretBytes>> {
        self.ensure_ready()?;
        Ok(self
            .source
            .get(&self.key(keys::PRIVATE_KEY))?
            .map(SecretBytes::new))
    }

    /// True if this gateway has a registered device: an identifier plus
    /// certificate material.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not ready or a value is corrupt.
    pub fn is_device_registered(&self) -> Result<bool> {
        self.ensure_ready()?;
        Ok(self.mag_identifier()?.is_some()
            && self.get_string(keys::CERT_CHAIN)?.is_some()
            && self.source.get(&self.key(keys::PRIVATE_KEY))?.is_some())
    }

    // ------------------------------------------------------------------
    // Snapshots and wipes
    // ------------------------------------------------------------------

    /// A consistent snapshot of everything stored for this gateway.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not ready or a value is corrupt.
    pub fn token_record(&self) -> Result<TokenRecord> {
        self.ensure_ready()?;
        let _read = self.guard.read();
        Ok(TokenRecord {
            access_token: self.get_string(keys::ACCESS_TOKEN)?,
            refresh_token: self.get_string(keys::REFRESH_TOKEN)?,
            access_token_expiry: self.get_millis(keys::TOKEN_EXPIRY)?,
            client_credentials: {
                let (id, secret) = (
                    self.get_string(keys::CLIENT_ID)?,
                    self.get_string(keys::CLIENT_SECRET)?,
                );
                match (id, secret) {
                    (Some(client_id), Some(client_secret)) => Some(ClientCredentialsRecord {
                        master_client_id: self
                            .get_string(keys::MASTER_CLIENT_ID)?
                            .unwrap_or_default(),
                        client_id,
                        client_secret: SecretString::new(client_secret),
                        expires_at: self.get_millis(keys::CLIENT_EXPIRE_TIME)?,
                    }),
                    _ => None,
                }
            },
            mag_identifier: self.get_string(keys::MAG_IDENTIFIER)?,
            certificate_chain: match self.get_string(keys::CERT_CHAIN)? {
                None => None,
                Some(text) => Some(pem::decode_certificate_chain(&text)?),
            },
            private_key: self
                .source
                .get(&self.key(keys::PRIVATE_KEY))?
                .map(SecretBytes::new),
        })
    }

    /// Remove every field stored for this gateway.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not ready or the backend fails.
    pub fn destroy_all_persistent_tokens(&self) -> Result<()> {
        self.ensure_ready()?;
        let _write = self.guard.write();
        for field in keys::ALL_FIELDS {
            self.source.remove(&self.key(field))?;
        }
        tracing::warn!(gateway = %self.gateway, "destroyed all persistent state");
        Ok(())
    }

    /// Remove every maglink-layout key for every gateway in `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn destroy_everything(source: &dyn DataSource) -> Result<()> {
        for key in source.list_keys()? {
            if keys::is_maglink_key(&key) {
                source.remove(&key)?;
            }
        }
        Ok(())
    }
}
