//! The policy/assertion chain.
//!
//! Every outbound request passes through an ordered chain of assertions:
//! each inspects or mutates the request before it is sent, and inspects the
//! response after it arrives (in reverse order). An assertion short-circuits
//! the request by returning a typed error.
//!
//! Fixed order: storage-ready → telephony (feature-flagged) → token
//! injection. When the MSISDN policy is disabled the telephony assertion is
//! not in the chain at all, so its response mapping never fires and a
//! 448/449 response falls through to the generic classification.

use std::sync::Arc;

use async_trait::async_trait;

use maglink_client::wire::{DeviceMetadata, GatewayResponse, RequestInfo};
use maglink_client::msisdn_failure;
use maglink_store::{StoreError, TokenStore};

use crate::error::{Result, SessionError};
use crate::manager::AuthManager;

/// Header carrying the device's mobile subscriber number.
pub const MSISDN_HEADER: &str = "msisdn";

/// Everything an assertion may consult.
pub struct AssertionContext {
    /// The active gateway's token store.
    pub store: Arc<TokenStore>,
    /// The active gateway's auth manager.
    pub manager: Arc<AuthManager>,
    /// The device this session runs on.
    pub device: DeviceMetadata,
}

/// A request/response interceptor in the policy chain.
#[async_trait]
pub trait Assertion: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Inspect or mutate the request before it is sent.
    async fn on_request(&self, cx: &AssertionContext, request: &mut RequestInfo) -> Result<()>;

    /// Inspect the response after it arrives. Runs in reverse chain order.
    async fn on_response(&self, cx: &AssertionContext, response: &GatewayResponse) -> Result<()> {
        let _ = (cx, response);
        Ok(())
    }
}

/// Fails fast when the backing store is locked or inaccessible.
pub struct StorageReadyAssertion;

#[async_trait]
impl Assertion for StorageReadyAssertion {
    fn name(&self) -> &'static str {
        "storage-ready"
    }

    async fn on_request(&self, cx: &AssertionContext, _request: &mut RequestInfo) -> Result<()> {
        if cx.store.is_ready() {
            Ok(())
        } else {
            Err(SessionError::Store(StoreError::Unavailable))
        }
    }
}

/// Attaches the device's mobile number and maps MSISDN policy failures.
///
/// Only present in the chain when the gateway's MSISDN policy is enabled.
pub struct TelephoneAssertion;

#[async_trait]
impl Assertion for TelephoneAssertion {
    fn name(&self) -> &'static str {
        "telephony"
    }

    async fn on_request(&self, cx: &AssertionContext, request: &mut RequestInfo) -> Result<()> {
        if let Some(msisdn) = &cx.device.msisdn {
            request.set_header(MSISDN_HEADER, msisdn.clone());
        }
        Ok(())
    }

    async fn on_response(&self, _cx: &AssertionContext, response: &GatewayResponse) -> Result<()> {
        match msisdn_failure(response) {
            Some(err) => Err(SessionError::Server(err)),
            None => Ok(()),
        }
    }
}

/// Ensures a valid access token exists and attaches it as a Bearer header.
///
/// Driving the auth manager here is what triggers registration and token
/// acquisition on the first protected request.
pub struct TokenInjectionAssertion;

#[async_trait]
impl Assertion for TokenInjectionAssertion {
    fn name(&self) -> &'static str {
        "token-injection"
    }

    async fn on_request(&self, cx: &AssertionContext, request: &mut RequestInfo) -> Result<()> {
        let token = cx.manager.ensure_access_token().await?;
        request.set_header("authorization", format!("Bearer {token}"));
        Ok(())
    }
}

/// The ordered assertion chain applied to every outbound request.
pub struct PolicyChain {
    assertions: Vec<Box<dyn Assertion>>,
}

impl PolicyChain {
    /// The standard chain: storage-ready → telephony (when the MSISDN
    /// policy is enabled) → token injection.
    #[must_use]
    pub fn standard(msisdn_enabled: bool) -> Self {
        let mut assertions: Vec<Box<dyn Assertion>> = vec![Box::new(StorageReadyAssertion)];
        if msisdn_enabled {
            assertions.push(Box::new(TelephoneAssertion));
        }
        assertions.push(Box::new(TokenInjectionAssertion));
        Self { assertions }
    }

    /// The chain's assertion names, in request order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.assertions.iter().map(|a| a.name()).collect()
    }

    /// Run every assertion's request side, in order.
    ///
    /// # Errors
    ///
    /// Returns the first assertion failure, which aborts the request.
    pub async fn apply_request(
        &self,
        cx: &AssertionContext,
        request: &mut RequestInfo,
    ) -> Result<()> {
        for assertion in &self.assertions {
            assertion.on_request(cx, request).await.map_err(|err| {
                tracing::debug!(assertion = assertion.name(), error = %err, "assertion rejected request");
                err
            })?;
        }
        Ok(())
    }

    /// Run every assertion's response side, in reverse order.
    ///
    /// # Errors
    ///
    /// Returns the first assertion failure, which becomes the request's
    /// outcome.
    pub async fn apply_response(
        &self,
        cx: &AssertionContext,
        response: &GatewayResponse,
    ) -> Result<()> {
        for assertion in self.assertions.iter().rev() {
            assertion.on_response(cx, response).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PkiError;
    use crate::manager::CredentialSlot;
    use crate::pki::{Keypair, Pki};
    use maglink_client::{ClientOptions, GatewayClient};
    use maglink_core::{GatewayIdentity, SecretBytes};
    use maglink_store::MemoryDataSource;
    use tokio::sync::Mutex;

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

    fn context(source: Arc<MemoryDataSource>, msisdn: Option<String>) -> AssertionContext {
        let gateway = GatewayIdentity::new("gw.example.com", 8443, "/mobile").unwrap();
        let store = Arc::new(TokenStore::new(&gateway, source.clone() as Arc<dyn maglink_store::DataSource>));
        let device = DeviceMetadata {
            device_id: "device-1".to_string(),
            device_name: "phone".to_string(),
            msisdn,
        };
        let client = Arc::new(GatewayClient::new(
            gateway,
            ClientOptions::new("master"),
        ));
        let manager = Arc::new(AuthManager::new(
            client,
            store.clone(),
            Arc::new(NullPki),
            device.clone(),
            Arc::new(Mutex::new(CredentialSlot::default())),
        ));
        AssertionContext {
            store,
            manager,
            device,
        }
    }

    #[test]
    fn standard_chain_order() {
        assert_eq!(
            PolicyChain::standard(true).names(),
            vec!["storage-ready", "telephony", "token-injection"]
        );
        assert_eq!(
            PolicyChain::standard(false).names(),
            vec!["storage-ready", "token-injection"]
        );
    }

    #[tokio::test]
    async fn storage_ready_rejects_locked_store() {
        let source = Arc::new(MemoryDataSource::new());
        let cx = context(source.clone(), None);
        source.set_locked(true);

        let mut request = RequestInfo::get("/resource");
        let err = StorageReadyAssertion
            .on_request(&cx, &mut request)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Store(StoreError::Unavailable)));
    }

    #[tokio::test]
    async fn telephony_attaches_msisdn_header() {
        let cx = context(
            Arc::new(MemoryDataSource::new()),
            Some("+15551234567".to_string()),
        );
        let mut request = RequestInfo::get("/resource");
        TelephoneAssertion.on_request(&cx, &mut request).await.unwrap();
        assert_eq!(request.header(MSISDN_HEADER), Some("+15551234567"));
    }

    #[tokio::test]
    async fn telephony_maps_msisdn_responses() {
        let cx = context(Arc::new(MemoryDataSource::new()), None);
        let response = GatewayResponse {
            status: 449,
            headers: Vec::new(),
            body: b"msisdn required".to_vec(),
        };
        let err = TelephoneAssertion
            .on_response(&cx, &response)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Server(maglink_client::ServerError::MobileNumberRequired { .. })
        ));
    }
}
