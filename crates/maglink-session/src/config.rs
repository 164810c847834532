//! Gateway configuration and storage-backend selection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use maglink_client::ClientOptions;
use maglink_core::GatewayIdentity;
use maglink_store::{DataSource, MemoryDataSource};

use crate::error::ConfigError;

/// Which key-value backend the session persists into.
///
/// An absent storage section deserializes to [`Default`](StorageKind::Default)
/// and falls back to the built-in memory backend. A *named* backend must
/// have a registered factory: naming one that does not exist fails SDK
/// construction with [`ConfigError::UnknownStorage`] instead of silently
/// falling back. Missing configuration and broken configuration are
/// different things.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// The built-in default backend.
    Default,
    /// A backend registered under this name.
    Named(String),
}

impl Default for StorageKind {
    fn default() -> Self {
        Self::Default
    }
}

/// Configuration for one gateway connection.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Gateway host.
    pub host: String,
    /// Gateway port.
    pub port: u16,
    /// URI path prefix all endpoints live under.
    #[serde(default)]
    pub prefix: String,
    /// The master (static) client id registered with this gateway.
    pub master_client_id: String,
    /// Whether the MSISDN (mobile number) policy is enabled for this
    /// gateway. Controls the telephony assertion.
    #[serde(default)]
    pub msisdn_enabled: bool,
    /// Request timeout in seconds.
    #[serde(default = "GatewayConfig::default_timeout")]
    pub timeout_seconds: u64,
    /// Overrides the token-endpoint path for gateways that mount the OAuth
    /// server somewhere nonstandard.
    #[serde(default)]
    pub token_path: Option<String>,
    /// Speak plain HTTP instead of TLS. Development gateways only.
    #[serde(default)]
    pub insecure_http: bool,
    /// Which storage backend to persist into.
    #[serde(default)]
    pub storage: StorageKind,
}

impl GatewayConfig {
    const fn default_timeout() -> u64 {
        30
    }

    /// Configuration for `host:port` with the given master client id and
    /// defaults everywhere else.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        prefix: impl Into<String>,
        master_client_id: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            prefix: prefix.into(),
            master_client_id: master_client_id.into(),
            msisdn_enabled: false,
            timeout_seconds: Self::default_timeout(),
            token_path: None,
            insecure_http: false,
            storage: StorageKind::Default,
        }
    }

    /// The gateway identity this configuration names.
    ///
    /// # Errors
    ///
    /// Returns an error if host, port or prefix are malformed.
    pub fn identity(&self) -> Result<GatewayIdentity, ConfigError> {
        Ok(GatewayIdentity::new(
            self.host.clone(),
            self.port,
            self.prefix.clone(),
        )?)
    }

    /// The request timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Protocol-client options derived from this configuration.
    #[must_use]
    pub fn client_options(&self) -> ClientOptions {
        let mut options = ClientOptions::new(self.master_client_id.clone());
        options.timeout = self.timeout();
        options.token_path = self.token_path.clone();
        options.insecure_http = self.insecure_http;
        options
    }
}

/// A factory producing a storage backend.
pub type StorageFactory = Arc<dyn Fn() -> Arc<dyn DataSource> + Send + Sync>;

/// Registry of named storage-backend factories.
#[derive(Default, Clone)]
pub struct StorageRegistry {
    factories: HashMap<String, StorageFactory>,
}

impl StorageRegistry {
    /// An empty registry: only the default backend resolves.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend factory under `name`.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn() -> Arc<dyn DataSource> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Resolve a [`StorageKind`] to a backend.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownStorage`] for a named backend with no
    /// registered factory.
    pub fn resolve(&self, kind: &StorageKind) -> Result<Arc<dyn DataSource>, ConfigError> {
        match kind {
            StorageKind::Default => Ok(Arc::new(MemoryDataSource::new())),
            StorageKind::Named(name) => self
                .factories
                .get(name)
                .map(|factory| factory())
                .ok_or_else(|| ConfigError::UnknownStorage(name.clone())),
        }
    }
}
