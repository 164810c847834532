//! Token acquisition and the registration state machine.
//!
//! One [`AuthManager`] exists per gateway. It owns the single most
//! important concurrency invariant in the SDK: at most one registration or
//! token round-trip is in flight per gateway, with every other caller
//! blocking on the same guard and reusing the freshly stored result. A
//! race here would produce duplicate device registrations or clobbered
//! token pairs.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use maglink_client::wire::{ClientAuth, DeviceMetadata};
use maglink_client::{GatewayClient, ServerError};
use maglink_core::{CredentialError, Credentials};
use maglink_store::TokenStore;

use crate::error::{PkiError, Result, SessionError};
use crate::pki::Pki;
use crate::state::{is_valid_transition, SessionState};

/// The session's credential slot.
///
/// Tracks whether the held credentials were already presented, so
/// single-use material (authorization codes, bearer assertions) is never
/// replayed, not even by the single retry that follows a recovery.
#[derive(Default)]
pub struct CredentialSlot {
    /// The credentials to present when a grant is needed.
    pub credentials: Option<Credentials>,
    /// True once the credentials have driven a grant.
    pub used: bool,
}

impl CredentialSlot {
    /// Install fresh credentials, resetting the used marker.
    pub fn set(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
        self.used = false;
    }
}

/// Registration and token lifecycle for a single gateway.
pub struct AuthManager {
    client: Arc<GatewayClient>,
    store: Arc<TokenStore>,
    pki: Arc<dyn Pki>,
    device: DeviceMetadata,
    credentials: Arc<AsyncMutex<CredentialSlot>>,
    // Singleflight guard: held across the whole registration/token
    // round-trip.
    flight: AsyncMutex<()>,
    state: Mutex<SessionState>,
}

impl AuthManager {
    /// Create the manager for one gateway.
    ///
    /// The initial state is derived from what the store already holds; an
    /// unreadable store starts the session at `Unregistered`.
    #[must_use]
    pub fn new(
        client: Arc<GatewayClient>,
        store: Arc<TokenStore>,
        pki: Arc<dyn Pki>,
        device: DeviceMetadata,
        credentials: Arc<AsyncMutex<CredentialSlot>>,
    ) -> Self {
        let initial = Self::derive_state(&store);
        Self {
            client,
            store,
            pki,
            device,
            credentials,
            flight: AsyncMutex::new(()),
            state: Mutex::new(initial),
        }
    }

    fn derive_state(store: &TokenStore) -> SessionState {
        let registered = store.is_device_registered().unwrap_or(false);
        if !registered {
            return SessionState::Unregistered;
        }
        let authenticated = store
            .access_token()
            .ok()
            .flatten()
            .is_some()
            && !store.is_access_token_expired(Utc::now()).unwrap_or(true);
        if authenticated {
            SessionState::Authenticated
        } else {
            SessionState::Registered
        }
    }

    /// The protocol client for this gateway.
    #[must_use]
    pub const fn client(&self) -> &Arc<GatewayClient> {
        &self.client
    }

    /// The token store for this gateway.
    #[must_use]
    pub const fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// The session's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Move the state machine to `to`.
    ///
    /// Illegal transitions are logged and taken anyway: the state machine
    /// documents the session, it must not wedge it.
    pub fn advance(&self, to: SessionState) {
        let mut state = self.state.lock();
        if !is_valid_transition(*state, to) && *state != to {
            tracing::warn!(from = ?*state, to = ?to, "irregular session state transition");
        }
        *state = to;
    }

    /// Ensure a valid access token exists for this gateway and return it.
    ///
    /// Fast path: a stored, unexpired token is returned immediately. Slow
    /// path: the singleflight guard is taken, the store re-checked, and
    /// exactly one of {refresh grant, register + credential grant} runs
    /// while concurrent callers queue on the guard.
    ///
    /// # Errors
    ///
    /// Propagates store, credential, PKI and gateway failures. Single-use
    /// credentials that were already presented fail with
    /// [`CredentialError::AlreadyConsumed`] rather than being replayed.
    pub async fn ensure_access_token(&self) -> Result<String> {
        if let Some(token) = self.current_valid_token(Utc::now())? {
            return Ok(token);
        }

        let _flight = self.flight.lock().await;
        // Another caller may have finished the round-trip while this one
        // waited on the guard.
        if let Some(token) = self.current_valid_token(Utc::now())? {
            return Ok(token);
        }
        self.acquire_locked().await
    }

    fn current_valid_token(&self, now: DateTime<Utc>) -> Result<Option<String>> {
        match self.store.access_token()? {
            Some(token) if !self.store.is_access_token_expired(now)? => Ok(Some(token)),
            _ => Ok(None),
        }
    }

    /// Acquire a token while holding the flight guard.
    async fn acquire_locked(&self) -> Result<String> {
        // A registered device holding a refresh token renews the grant; it
        // never re-registers just because the access token aged out.
        if self.store.is_device_registered()? {
            if let Some(refresh) = self.store.refresh_token()? {
                match self.refresh_grant(&refresh).await {
                    Ok(token) => return Ok(token),
                    Err(SessionError::Server(
                        ServerError::Protocol { .. } | ServerError::Decode(_),
                    )) => {
                        // The refresh token itself was refused. Drop the
                        // pair and fall back to a full credential grant.
                        tracing::warn!(gateway = %self.store.gateway(), "refresh grant refused, falling back to credentials");
                        self.store.clear_access_and_refresh_tokens()?;
                        self.advance(SessionState::Registered);
                    }
                    Err(other) => return Err(other),
                }
            }
        }

        self.credential_grant().await
    }

    async fn refresh_grant(&self, refresh_token: &str) -> Result<String> {
        self.advance(SessionState::TokenPending);
        let client_auth = self.client_auth().await?;
        let mag = self.store.mag_identifier()?;
        let grant = self
            .client
            .refresh_token(refresh_token, &client_auth, mag.as_deref())
            .await
            .map_err(|err| {
                self.advance(SessionState::Registered);
                SessionError::from(err)
            })?;

        self.save_grant(&grant)?;
        self.advance(SessionState::Authenticated);
        Ok(grant.access_token)
    }

    async fn credential_grant(&self) -> Result<String> {
        let mut slot = self.credentials.lock().await;
        let Some(credentials) = slot.credentials.as_ref() else {
            return Err(SessionError::Validation(CredentialError::Invalid(
                "no credentials supplied".to_string(),
            )));
        };
        if !credentials.is_valid() {
            return Err(SessionError::Validation(CredentialError::Invalid(
                "credentials are incomplete or cleared".to_string(),
            )));
        }
        if slot.used && !credentials.is_reusable() {
            // Terminal: stale single-use material is never replayed.
            return Err(SessionError::Validation(CredentialError::AlreadyConsumed));
        }

        if !self.store.is_device_registered()? {
            self.advance(SessionState::Registering);
            if let Err(err) = self.register(credentials).await {
                self.advance(SessionState::Unregistered);
                return Err(err);
            }
            self.advance(SessionState::Registered);
        }

        let client_auth = self.client_auth().await?;
        let mag = self.store.mag_identifier()?;
        self.advance(SessionState::TokenPending);
        let grant = self
            .client
            .request_token(credentials, &client_auth, mag.as_deref())
            .await
            .map_err(|err| {
                self.advance(SessionState::Registered);
                SessionError::from(err)
            })?;

        slot.used = true;
        self.save_grant(&grant)?;
        self.advance(SessionState::Authenticated);
        Ok(grant.access_token)
    }

    fn save_grant(&self, grant: &maglink_client::TokenGrant) -> Result<()> {
        let now = Utc::now();
        // A lifetime too large to represent saturates to the far future.
        let expires_at = i64::try_from(grant.expires_in)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.store
            .save_tokens(&grant.access_token, &grant.refresh_token, expires_at)?;
        Ok(())
    }

    /// Register the device: generate a keypair, post a certification
    /// request, persist the issued chain, key and identifier.
    async fn register(&self, credentials: &Credentials) -> Result<()> {
        let keypair = self.pki.generate_keypair()?;
        let subject = format!("cn={}", self.device.device_id);
        let csr = self.pki.certification_request(&keypair, &subject)?;

        let registration = self
            .client
            .register_device(credentials, &self.device, &csr)
            .await?;

        // The issued leaf must certify the key generated above.
        let leaf = registration.certificate_chain.first().ok_or_else(|| {
            PkiError("registration returned an empty certificate chain".to_string())
        })?;
        let issued_key = self.pki.leaf_public_key(leaf)?;
        if issued_key != keypair.public_key_der {
            return Err(SessionError::Pki(PkiError(
                "issued certificate does not match the generated key".to_string(),
            )));
        }

        self.store
            .save_private_key(keypair.private_key_der.expose())?;
        self.store
            .save_certificate_chain(&registration.certificate_chain)?;
        self.store
            .save_mag_identifier(&registration.mag_identifier)?;
        tracing::info!(
            gateway = %self.store.gateway(),
            mag_identifier = %registration.mag_identifier,
            key_pin = %maglink_store::pem::public_key_pin(&issued_key),
            "device registered"
        );
        Ok(())
    }

    /// Dynamic client credentials, minting a fresh pair when the stored one
    /// is absent, expired, or minted under a different master client.
    async fn client_auth(&self) -> Result<ClientAuth> {
        if let Some(record) = self.store.client_credentials()? {
            if !record.is_expired(Utc::now())
                && record.issued_under(self.client.master_client_id())
            {
                return Ok(ClientAuth {
                    client_id: record.client_id,
                    client_secret: record.client_secret,
                });
            }
        }

        let record = self
            .client
            .initialize_client_credentials(&self.device.device_id)
            .await?;
        self.store.save_client_credentials(&record)?;
        Ok(ClientAuth {
            client_id: record.client_id,
            client_secret: record.client_secret,
        })
    }

    // ------------------------------------------------------------------
    // Recovery actions. Each performs exactly one corrective step; the
    // session context owns the single retry that follows.
    // ------------------------------------------------------------------

    /// Renew the device certificate in place.
    ///
    /// On a refused renewal the device's persistent state is destroyed so
    /// the retry drives a fresh registration. On success the new chain is
    /// persisted and the transport reset so TLS picks it up.
    ///
    /// # Errors
    ///
    /// Returns an error only if the renewal could not be attempted or the
    /// result could not be persisted; in that case the caller surfaces
    /// the ORIGINAL error, not this one.
    pub async fn renew_certificate(&self) -> Result<()> {
        let mag = self.store.mag_identifier()?;
        match self.client.renew_device(mag.as_deref()).await {
            Ok(chain) => {
                self.store.save_certificate_chain(&chain)?;
                self.client.reset_transport();
                self.advance(SessionState::Authenticated);
                Ok(())
            }
            Err(ServerError::DeviceRenewalFailed { code, status }) => {
                tracing::warn!(code, status, "certificate renewal refused, forcing re-registration");
                self.store.destroy_all_persistent_tokens()?;
                self.advance(SessionState::Unregistered);
                Ok(())
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Clear the OAuth pair and the dynamic client credentials, forcing a
    /// full re-auth on the retry. The device registration survives.
    ///
    /// # Errors
    ///
    /// Returns an error if the store refuses the clears.
    pub fn clear_credentials(&self) -> Result<()> {
        self.store.clear_access_and_refresh_tokens()?;
        self.store.clear_client_credentials()?;
        self.advance(SessionState::Registered);
        Ok(())
    }

    /// Destroy every persisted field for this gateway. The retry starts
    /// from an unregistered device.
    ///
    /// # Errors
    ///
    /// Returns an error if the store refuses the wipe.
    pub fn destroy_tokens(&self) -> Result<()> {
        self.store.destroy_all_persistent_tokens()?;
        self.advance(SessionState::Unregistered);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::Keypair;
    use maglink_client::ClientOptions;
    use maglink_core::{GatewayIdentity, SecretBytes};
    use maglink_store::{DataSource, MemoryDataSource};

    struct NullPki;

    impl Pki for NullPki {
        fn generate_keypair(&self) -> std::result::Result<Keypair, PkiError> {
            Ok(Keypair {
                private_key_der: SecretBytes::new(vec![0]),
                public_key_der: vec![0],
            })
        }

        fn certification_request(
            &self,
            _keypair: &Keypair,
            _subject: &str,
        ) -> std::result::Result<Vec<u8>, PkiError> {
            Ok(vec![0])
        }

        fn leaf_public_key(&self, _cert_der: &[u8]) -> std::result::Result<Vec<u8>, PkiError> {
            Ok(vec![0])
        }
    }

    fn manager_with(source: &Arc<MemoryDataSource>) -> AuthManager {
        let gateway = GatewayIdentity::new("gw.example.com", 8443, "/mobile").unwrap();
        let store = Arc::new(TokenStore::new(
            &gateway,
            Arc::clone(source) as Arc<dyn DataSource>,
        ));
        let client = Arc::new(GatewayClient::new(
            gateway,
            ClientOptions::new("master"),
        ));
        AuthManager::new(
            client,
            store,
            Arc::new(NullPki),
            DeviceMetadata {
                device_id: "device-1".to_string(),
                device_name: "phone".to_string(),
                msisdn: None,
            },
            Arc::new(AsyncMutex::new(CredentialSlot::default())),
        )
    }

    #[tokio::test]
    async fn missing_credentials_fail_validation_before_any_network_call() {
        let source = Arc::new(MemoryDataSource::new());
        let manager = manager_with(&source);

        let err = manager.ensure_access_token().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Validation(CredentialError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn consumed_single_use_credentials_are_terminal() {
        let source = Arc::new(MemoryDataSource::new());
        let manager = manager_with(&source);
        {
            let mut slot = manager.credentials.lock().await;
            slot.set(Credentials::jwt_bearer("assertion"));
            slot.used = true;
        }

        let err = manager.ensure_access_token().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Validation(CredentialError::AlreadyConsumed)
        ));
    }

    #[tokio::test]
    async fn cleared_credentials_fail_validation() {
        let source = Arc::new(MemoryDataSource::new());
        let manager = manager_with(&source);
        {
            let mut slot = manager.credentials.lock().await;
            let mut creds = Credentials::password("alice", "pw");
            creds.clear();
            slot.set(creds);
        }

        let err = manager.ensure_access_token().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Validation(CredentialError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn fresh_stored_token_short_circuits() {
        let source = Arc::new(MemoryDataSource::new());
        let manager = manager_with(&source);
        manager
            .store()
            .save_tokens("cached", "refresh", Utc::now() + Duration::hours(1))
            .unwrap();

        // No credentials installed: reaching the network would fail, so a
        // success here proves the fast path.
        assert_eq!(manager.ensure_access_token().await.unwrap(), "cached");
    }

    #[test]
    fn initial_state_derives_from_store() {
        let source = Arc::new(MemoryDataSource::new());
        let manager = manager_with(&source);
        assert_eq!(manager.state(), SessionState::Unregistered);

        manager.store().save_mag_identifier("dev-1").unwrap();
        manager.store().save_certificate_chain(&[vec![0x30]]).unwrap();
        manager.store().save_private_key(&[1]).unwrap();
        let manager = manager_with(&source);
        assert_eq!(manager.state(), SessionState::Registered);

        manager
            .store()
            .save_tokens("at", "rt", Utc::now() + Duration::hours(1))
            .unwrap();
        let manager = manager_with(&source);
        assert_eq!(manager.state(), SessionState::Authenticated);
    }

    #[test]
    fn clear_credentials_keeps_registration() {
        let source = Arc::new(MemoryDataSource::new());
        let manager = manager_with(&source);
        manager.store().save_mag_identifier("dev-1").unwrap();
        manager.store().save_certificate_chain(&[vec![0x30]]).unwrap();
        manager.store().save_private_key(&[1]).unwrap();
        manager
            .store()
            .save_tokens("at", "rt", Utc::now() + Duration::hours(1))
            .unwrap();

        manager.clear_credentials().unwrap();

        assert_eq!(manager.store().access_token().unwrap(), None);
        assert!(manager.store().is_device_registered().unwrap());
        assert_eq!(manager.state(), SessionState::Registered);
    }

    #[test]
    fn destroy_tokens_resets_to_unregistered() {
        let source = Arc::new(MemoryDataSource::new());
        let manager = manager_with(&source);
        manager.store().save_mag_identifier("dev-1").unwrap();

        manager.destroy_tokens().unwrap();

        assert!(!manager.store().is_device_registered().unwrap());
        assert_eq!(manager.state(), SessionState::Unregistered);
    }
}
