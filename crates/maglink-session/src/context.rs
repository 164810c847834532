//! The session context: the SDK's front door.
//!
//! A [`SessionContext`] is an explicitly constructed handle (no global
//! singletons) owning the gateway registry, the per-gateway auth managers,
//! and the credential slot. Protected requests enter through
//! [`execute`](SessionContext::execute), which drives the policy chain,
//! classifies failures, performs at most one recovery, and issues at most
//! one retry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use maglink_client::wire::{DeviceMetadata, GatewayResponse, RequestInfo};
use maglink_client::{GatewayClient, ServerError};
use maglink_core::{Credentials, GatewayIdentity};
use maglink_store::{DataSource, TokenRecord, TokenStore};

use crate::config::{GatewayConfig, StorageRegistry};
use crate::error::{ConfigError, Result, SessionError};
use crate::manager::{AuthManager, CredentialSlot};
use crate::pki::Pki;
use crate::policy::{AssertionContext, PolicyChain};
use crate::registry::{GatewayEvent, GatewayRegistry};
use crate::state::SessionState;

use tokio::sync::broadcast;
use tokio::sync::Mutex as AsyncMutex;

/// A protected request plus its cancellable identity.
pub struct OutboundRequest {
    /// The request to send.
    pub request: RequestInfo,
    /// Identity of this dispatch, for logs and correlation.
    pub request_id: Uuid,
    /// Cancels the in-flight HTTP call and skips any pending retry.
    pub cancel: CancellationToken,
}

impl OutboundRequest {
    /// Wrap a request with a fresh id and cancellation token.
    #[must_use]
    pub fn new(request: RequestInfo) -> Self {
        Self {
            request,
            request_id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A handle that cancels this request.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl From<RequestInfo> for OutboundRequest {
    fn from(request: RequestInfo) -> Self {
        Self::new(request)
    }
}

/// The one corrective step a recoverable error maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecoveryAction {
    RenewCertificate,
    ClearCredentials,
    DestroyTokens,
}

async fn recover(manager: &AuthManager, action: RecoveryAction) -> Result<()> {
    match action {
        RecoveryAction::RenewCertificate => manager.renew_certificate().await,
        RecoveryAction::ClearCredentials => manager.clear_credentials(),
        RecoveryAction::DestroyTokens => manager.destroy_tokens(),
    }
}

fn recovery_action(err: &SessionError) -> Option<RecoveryAction> {
    match err {
        SessionError::Server(ServerError::CertificateExpired { .. }) => {
            Some(RecoveryAction::RenewCertificate)
        }
        SessionError::Server(ServerError::InvalidClientCredentials { .. }) => {
            Some(RecoveryAction::ClearCredentials)
        }
        SessionError::Server(ServerError::InvalidMagIdentifier { .. }) => {
            Some(RecoveryAction::DestroyTokens)
        }
        _ => None,
    }
}

struct Inner {
    registry: GatewayRegistry,
    device: DeviceMetadata,
    pki: Arc<dyn Pki>,
    source: Arc<dyn DataSource>,
    credentials: Arc<AsyncMutex<CredentialSlot>>,
    configs: parking_lot::Mutex<HashMap<GatewayIdentity, GatewayConfig>>,
    managers: parking_lot::Mutex<HashMap<GatewayIdentity, Arc<AuthManager>>>,
}

/// Handle to one SDK instance.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<Inner>,
}

/// Builder for [`SessionContext`].
#[derive(Default)]
pub struct SessionContextBuilder {
    config: Option<GatewayConfig>,
    device: Option<DeviceMetadata>,
    credentials: Option<Credentials>,
    pki: Option<Arc<dyn Pki>>,
    storage: StorageRegistry,
    data_source: Option<Arc<dyn DataSource>>,
}

impl SessionContextBuilder {
    /// The gateway to connect to.
    #[must_use]
    pub fn gateway(mut self, config: GatewayConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// The device this session runs on.
    #[must_use]
    pub fn device(mut self, device: DeviceMetadata) -> Self {
        self.device = Some(device);
        self
    }

    /// Credentials to present when a grant is needed.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// The platform PKI collaborator. Required.
    #[must_use]
    pub fn pki(mut self, pki: Arc<dyn Pki>) -> Self {
        self.pki = Some(pki);
        self
    }

    /// Named storage-backend factories.
    #[must_use]
    pub fn storage_registry(mut self, storage: StorageRegistry) -> Self {
        self.storage = storage;
        self
    }

    /// Use this backend directly, bypassing storage-kind resolution.
    #[must_use]
    pub fn data_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.data_source = Some(source);
        self
    }

    /// Build the session.
    ///
    /// # Errors
    ///
    /// Fails immediately on a malformed gateway identity, a named storage
    /// backend with no registered factory, or a missing required
    /// collaborator. Construction errors are never retried.
    pub fn build(self) -> std::result::Result<SessionContext, ConfigError> {
        let config = self.config.ok_or(ConfigError::Missing("gateway"))?;
        let pki = self.pki.ok_or(ConfigError::Missing("pki"))?;
        let identity = config.identity()?;
        let source = match self.data_source {
            Some(source) => source,
            None => self.storage.resolve(&config.storage)?,
        };
        let device = self
            .device
            .unwrap_or_else(|| DeviceMetadata::generated("maglink-device"));

        let mut slot = CredentialSlot::default();
        if let Some(credentials) = self.credentials {
            slot.set(credentials);
        }

        let mut configs = HashMap::new();
        configs.insert(identity.clone(), config);

        Ok(SessionContext {
            inner: Arc::new(Inner {
                registry: GatewayRegistry::new(identity),
                device,
                pki,
                source,
                credentials: Arc::new(AsyncMutex::new(slot)),
                configs: parking_lot::Mutex::new(configs),
                managers: parking_lot::Mutex::new(HashMap::new()),
            }),
        })
    }
}

impl SessionContext {
    /// Start building a session.
    #[must_use]
    pub fn builder() -> SessionContextBuilder {
        SessionContextBuilder::default()
    }

    /// The currently connected gateway.
    #[must_use]
    pub fn active_gateway(&self) -> GatewayIdentity {
        self.inner.registry.active()
    }

    /// Subscribe to gateway-switch notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.registry.subscribe()
    }

    /// The active gateway session's lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns an error if no configuration exists for the active gateway.
    pub fn state(&self) -> Result<SessionState> {
        Ok(self.active_manager()?.state())
    }

    /// Install fresh credentials (resets the single-use marker).
    pub async fn set_credentials(&self, credentials: Credentials) {
        self.inner.credentials.lock().await.set(credentials);
    }

    fn config_for(&self, identity: &GatewayIdentity) -> Result<GatewayConfig> {
        self.inner
            .configs
            .lock()
            .get(identity)
            .cloned()
            .ok_or_else(|| {
                SessionError::Config(ConfigError::Missing("no configuration for active gateway"))
            })
    }

    fn active_manager(&self) -> Result<Arc<AuthManager>> {
        let identity = self.inner.registry.active();
        let config = self.config_for(&identity)?;

        // Held across the check-and-insert: two concurrent callers must
        // never end up with distinct managers (and distinct singleflight
        // guards) for the same gateway.
        let mut managers = self.inner.managers.lock();
        if let Some(manager) = managers.get(&identity) {
            return Ok(Arc::clone(manager));
        }

        let client = Arc::new(GatewayClient::new(
            identity.clone(),
            config.client_options(),
        ));
        let store = Arc::new(TokenStore::new(&identity, Arc::clone(&self.inner.source)));
        let manager = Arc::new(AuthManager::new(
            client,
            store,
            Arc::clone(&self.inner.pki),
            self.inner.device.clone(),
            Arc::clone(&self.inner.credentials),
        ));
        managers.insert(identity, Arc::clone(&manager));
        Ok(manager)
    }

    /// Execute a protected request against the active gateway.
    ///
    /// The request passes through the policy chain (storage-ready →
    /// telephony → token injection), is sent, and its response is mapped
    /// through the chain in reverse. A recoverable failure triggers its
    /// single corrective action followed by exactly one retry; the retry's
    /// outcome (success or failure) is final. If recovery itself fails,
    /// the original error is surfaced unmodified.
    ///
    /// Cancellation aborts the in-flight HTTP call. A recovery that has
    /// already started still completes (it mutates shared token state),
    /// but the retry is skipped.
    ///
    /// # Errors
    ///
    /// Returns a typed [`SessionError`] carrying the vendor code, HTTP
    /// status and cause; OTP challenges arrive as
    /// [`ServerError::Otp`] with their retry metadata.
    pub async fn execute(&self, request: impl Into<OutboundRequest>) -> Result<GatewayResponse> {
        let OutboundRequest {
            request,
            request_id,
            cancel,
        } = request.into();

        let manager = self.active_manager()?;
        let config = self.config_for(manager.store().gateway())?;
        let chain = PolicyChain::standard(config.msisdn_enabled);
        let cx = AssertionContext {
            store: Arc::clone(manager.store()),
            manager: Arc::clone(&manager),
            device: self.inner.device.clone(),
        };

        tracing::debug!(%request_id, path = %request.path, "dispatching protected request");
        let original = match self.attempt(&chain, &cx, &manager, &request, &cancel).await {
            Ok(response) => return Ok(response),
            Err(err) => err,
        };

        let Some(action) = recovery_action(&original) else {
            return Err(original);
        };

        manager.advance(SessionState::Recovering);
        tracing::debug!(%request_id, ?action, "recovering session");
        if let Err(recovery_err) = recover(&manager, action).await {
            tracing::warn!(%request_id, error = %recovery_err, "recovery failed, surfacing original error");
            return Err(original);
        }

        if cancel.is_cancelled() {
            // Recovery completed (it affects shared state), the retry is
            // skipped.
            return Err(SessionError::Cancelled);
        }

        tracing::debug!(%request_id, "retrying after recovery");
        self.attempt(&chain, &cx, &manager, &request, &cancel).await
    }

    async fn attempt(
        &self,
        chain: &PolicyChain,
        cx: &AssertionContext,
        manager: &Arc<AuthManager>,
        request: &RequestInfo,
        cancel: &CancellationToken,
    ) -> Result<GatewayResponse> {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        let mut request = request.clone();
        chain.apply_request(cx, &mut request).await?;

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(SessionError::Cancelled),
            result = manager.client().execute(&request) => result?,
        };

        chain.apply_response(cx, &response).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(ServerError::classify(&response).into())
        }
    }

    /// Clear the OAuth pair for the active gateway, keeping the device
    /// registration and client identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the store refuses the clear.
    pub fn logout(&self) -> Result<()> {
        let manager = self.active_manager()?;
        manager.store().clear_access_and_refresh_tokens()?;
        manager.advance(SessionState::Registered);
        Ok(())
    }

    /// Destroy everything persisted for the active gateway.
    ///
    /// # Errors
    ///
    /// Returns an error if the store refuses the wipe.
    pub fn deregister(&self) -> Result<()> {
        let manager = self.active_manager()?;
        manager.destroy_tokens()
    }

    /// Destroy persisted state for every known gateway.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn destroy_all_gateways(&self) -> Result<()> {
        TokenStore::destroy_everything(self.inner.source.as_ref())?;
        Ok(())
    }

    /// Snapshot of everything persisted for the active gateway.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not ready or holds corrupt values.
    pub fn token_record(&self) -> Result<TokenRecord> {
        Ok(self.active_manager()?.store().token_record()?)
    }

    /// Switch to another gateway.
    ///
    /// Emits a before-switch notification, swaps the active identity
    /// atomically, then emits an after-switch notification. All subsequent
    /// storage and request operations resolve against the new gateway's
    /// namespace; the old gateway's persisted record is retained under its
    /// own namespace. In-flight requests against the old gateway are not
    /// quiesced.
    ///
    /// # Errors
    ///
    /// Fails on a malformed gateway identity; the active gateway is
    /// unchanged in that case.
    pub fn switch_gateway(&self, config: GatewayConfig) -> Result<GatewayIdentity> {
        let identity = config.identity()?;
        self.inner
            .configs
            .lock()
            .insert(identity.clone(), config);
        let previous = self.inner.registry.switch(identity);
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PkiError;
    use crate::pki::Keypair;
    use maglink_core::SecretBytes;
    use maglink_store::MemoryDataSource;

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

    fn build_session() -> SessionContext {
        SessionContext::builder()
            .gateway(GatewayConfig::new("gw-a.example.com", 8443, "/mobile", "master"))
            .pki(Arc::new(NullPki))
            .build()
            .unwrap()
    }

    #[test]
    fn build_requires_gateway_and_pki() {
        let err = SessionContext::builder().build().err().unwrap();
        assert!(matches!(err, ConfigError::Missing("gateway")));

        let err = SessionContext::builder()
            .gateway(GatewayConfig::new("gw", 8443, "", "master"))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::Missing("pki")));
    }

    #[test]
    fn build_rejects_unknown_named_storage() {
        let mut config = GatewayConfig::new("gw", 8443, "", "master");
        config.storage = crate::config::StorageKind::Named("vault".to_string());
        let err = SessionContext::builder()
            .gateway(config)
            .pki(Arc::new(NullPki))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::UnknownStorage(_)));
    }

    #[tokio::test]
    async fn switch_emits_ordered_events_and_renames_namespace() {
        let session = build_session();
        let mut events = session.subscribe();
        let from = session.active_gateway();

        session
            .switch_gateway(GatewayConfig::new("gw-b.example.com", 8443, "/mobile", "master"))
            .unwrap();
        let to = session.active_gateway();
        assert_eq!(to.host(), "gw-b.example.com");

        assert_eq!(
            events.recv().await.unwrap(),
            GatewayEvent::BeforeSwitch {
                from: from.clone(),
                to: to.clone()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            GatewayEvent::AfterSwitch { from, to }
        );
    }

    #[tokio::test]
    async fn pre_cancelled_request_never_reaches_the_network() {
        let session = build_session();
        let request = OutboundRequest::new(RequestInfo::get("/resource"));
        request.cancellation().cancel();

        let err = session.execute(request).await.unwrap_err();
        assert!(matches!(err, SessionError::Cancelled));
    }

    #[test]
    fn request_ids_are_unique() {
        let a = OutboundRequest::new(RequestInfo::get("/r"));
        let b = OutboundRequest::new(RequestInfo::get("/r"));
        assert_ne!(a.request_id, b.request_id);
    }

    #[tokio::test]
    async fn switch_isolates_token_namespaces() {
        let source = Arc::new(MemoryDataSource::new());
        let session = SessionContext::builder()
            .gateway(GatewayConfig::new("gw-a.example.com", 8443, "/mobile", "master"))
            .pki(Arc::new(NullPki))
            .data_source(source as Arc<dyn DataSource>)
            .build()
            .unwrap();

        let manager = session.active_manager().unwrap();
        manager
            .store()
            .save_tokens("at-a", "rt-a", chrono::Utc::now() + chrono::Duration::hours(1))
            .unwrap();

        session
            .switch_gateway(GatewayConfig::new("gw-b.example.com", 8443, "/mobile", "master"))
            .unwrap();
        assert!(session.token_record().unwrap().access_token.is_none());

        // Switching back finds gateway A's record retained.
        session
            .switch_gateway(GatewayConfig::new("gw-a.example.com", 8443, "/mobile", "master"))
            .unwrap();
        assert_eq!(
            session.token_record().unwrap().access_token.as_deref(),
            Some("at-a")
        );
    }
}
