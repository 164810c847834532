//! The gateway protocol client.

use std::time::Duration;

use base64::prelude::*;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use maglink_core::{Credentials, GatewayIdentity, SecretString};
use maglink_store::pem;
use maglink_store::ClientCredentialsRecord;

use crate::error::{Result, ServerError};
use crate::wire::{ClientAuth, DeviceMetadata, DeviceRegistration, GatewayResponse, RequestInfo, TokenGrant};

/// Header naming the requested certificate format on device calls.
pub const CERT_FORMAT_HEADER: &str = "cert-format";
/// Header carrying the server-issued device identifier.
pub const MAG_IDENTIFIER_HEADER: &str = "mag-identifier";
/// Header carrying the caller-chosen device id (base64).
pub const DEVICE_ID_HEADER: &str = "device-id";
/// Header carrying the human-readable device name.
pub const DEVICE_NAME_HEADER: &str = "device-name";

const TOKEN_PATH: &str = "/auth/oauth/v2/token";
const REGISTER_DEVICE_PATH: &str = "/connect/device/register";
const REGISTER_CLIENT_PATH: &str = "/connect/device/register/client";
const RENEW_DEVICE_PATH: &str = "/connect/device/renew";
const CLIENT_INITIALIZE_PATH: &str = "/connect/client/initialize";

/// Options for constructing a [`GatewayClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// The master (static) client id registered with the gateway.
    pub master_client_id: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Overrides the token-endpoint path for gateways that mount the OAuth
    /// server somewhere nonstandard. `None` uses the default route.
    pub token_path: Option<String>,
    /// Speak plain HTTP instead of TLS. Development gateways only.
    pub insecure_http: bool,
}

impl ClientOptions {
    /// Options for the given master client id with a 30 second timeout.
    pub fn new(master_client_id: impl Into<String>) -> Self {
        Self {
            master_client_id: master_client_id.into(),
            timeout: Duration::from_secs(30),
            token_path: None,
            insecure_http: false,
        }
    }
}

/// Client for one gateway's device and token endpoints.
///
/// The underlying HTTP client is rebuilt by
/// [`reset_transport`](Self::reset_transport) after certificate renewal so
/// the TLS layer picks up fresh client-certificate material on its next
/// connection.
pub struct GatewayClient {
    gateway: GatewayIdentity,
    options: ClientOptions,
    http: RwLock<reqwest::Client>,
}

impl GatewayClient {
    /// Create a client for `gateway`.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created (should never happen
    /// with default TLS).
    #[must_use]
    pub fn new(gateway: GatewayIdentity, options: ClientOptions) -> Self {
        let http = RwLock::new(Self::build_http(options.timeout));
        Self {
            gateway,
            options,
            http,
        }
    }

    fn build_http(timeout: Duration) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to create HTTP client")
    }

    /// The gateway this client talks to.
    #[must_use]
    pub const fn gateway(&self) -> &GatewayIdentity {
        &self.gateway
    }

    /// The configured master client id.
    #[must_use]
    pub fn master_client_id(&self) -> &str {
        &self.options.master_client_id
    }

    /// Rebuild the underlying HTTP client.
    ///
    /// Called after certificate renewal: the replacement client's TLS
    /// sessions are built fresh, so renewed client-certificate material is
    /// picked up instead of a resumed session with the old certificate.
    pub fn reset_transport(&self) {
        *self.http.write() = Self::build_http(self.options.timeout);
        tracing::debug!(gateway = %self.gateway, "reset gateway transport");
    }

    fn base_url(&self) -> String {
        if self.options.insecure_http {
            format!(
                "http://{}:{}{}",
                self.gateway.host(),
                self.gateway.port(),
                self.gateway.prefix()
            )
        } else {
            self.gateway.base_url()
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url())
    }

    async fn send(
        &self,
        method: reqwest::Method,
        url: &str,
        headers: &[(String, String)],
        form: Option<&[(String, String)]>,
        body: Option<Vec<u8>>,
    ) -> Result<GatewayResponse> {
        let client = self.http.read().clone();
        let mut builder = client.request(method, url);
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(params) = form {
            builder = builder.form(params);
        } else if let Some(bytes) = body {
            builder = builder.body(bytes);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response.bytes().await?.to_vec();
        Ok(GatewayResponse {
            status,
            headers,
            body,
        })
    }

    // ------------------------------------------------------------------
    // Device lifecycle
    // ------------------------------------------------------------------

    /// Register this device with the gateway.
    ///
    /// Posts the credential's headers and form parameters together with the
    /// device metadata and a certificate signing request; the gateway
    /// answers with the issued PEM chain in the body and the device's
    /// identifier in the `mag-identifier` header. App-only
    /// (client-credentials) registrations go to the client registration
    /// route.
    ///
    /// # Errors
    ///
    /// Returns a typed error decoded from `x-ca-err` where one applies,
    /// otherwise [`ServerError::RegistrationFailed`]; a 2xx response
    /// missing the identifier header or a decodable chain is
    /// [`ServerError::Decode`].
    pub async fn register_device(
        &self,
        credentials: &Credentials,
        device: &DeviceMetadata,
        csr_der: &[u8],
    ) -> Result<DeviceRegistration> {
        let path = if matches!(credentials, Credentials::ClientCredentials) {
            REGISTER_CLIENT_PATH
        } else {
            REGISTER_DEVICE_PATH
        };
        let url = self.url(path);

        let mut headers = credentials.headers();
        headers.push((
            DEVICE_ID_HEADER.to_string(),
            BASE64_STANDARD.encode(&device.device_id),
        ));
        headers.push((DEVICE_NAME_HEADER.to_string(), device.device_name.clone()));
        headers.push((CERT_FORMAT_HEADER.to_string(), "pem".to_string()));

        let mut form = vec![(
            "grant_type".to_string(),
            credentials.grant_type().to_string(),
        )];
        form.extend(credentials.params());
        form.push((
            "certificateSigningRequest".to_string(),
            BASE64_STANDARD.encode(csr_der),
        ));

        tracing::debug!(gateway = %self.gateway, grant = credentials.grant_type(), "registering device");
        let response = self
            .send(reqwest::Method::POST, &url, &headers, Some(&form), None)
            .await?;

        if !response.is_success() {
            return Err(match ServerError::classify(&response) {
                ServerError::Protocol {
                    code,
                    status,
                    message,
                    ..
                } => ServerError::RegistrationFailed {
                    code,
                    status,
                    message,
                },
                typed => typed,
            });
        }

        let mag_identifier = response
            .header(MAG_IDENTIFIER_HEADER)
            .ok_or_else(|| {
                ServerError::Decode("registration response missing mag-identifier".to_string())
            })?
            .to_string();
        let certificate_chain = pem::decode_certificate_chain(&response.body_text())
            .map_err(|e| ServerError::Decode(e.to_string()))?;

        Ok(DeviceRegistration {
            mag_identifier,
            certificate_chain,
        })
    }

    /// Renew the device's client certificate.
    ///
    /// A PUT with no body, authenticated at the TLS layer by the (possibly
    /// expired) existing client certificate. HTTP 200 carries the renewed
    /// PEM chain; any other status means the certificate cannot be renewed
    /// and the device must register from scratch.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::DeviceRenewalFailed`] on any non-200 status,
    /// [`ServerError::Decode`] if the 200 body is not a PEM chain.
    pub async fn renew_device(&self, mag_identifier: Option<&str>) -> Result<Vec<Vec<u8>>> {
        let url = self.url(RENEW_DEVICE_PATH);
        let mut headers = vec![(CERT_FORMAT_HEADER.to_string(), "pem".to_string())];
        if let Some(identifier) = mag_identifier {
            headers.push((MAG_IDENTIFIER_HEADER.to_string(), identifier.to_string()));
        }

        tracing::debug!(gateway = %self.gateway, "renewing device certificate");
        let response = self
            .send(reqwest::Method::PUT, &url, &headers, None, None)
            .await?;

        if response.status != 200 {
            return Err(ServerError::DeviceRenewalFailed {
                code: crate::error::find_error_code(&response),
                status: response.status,
            });
        }

        pem::decode_certificate_chain(&response.body_text())
            .map_err(|e| ServerError::Decode(e.to_string()))
    }

    /// Bootstrap dynamic client credentials for this device.
    ///
    /// # Errors
    ///
    /// Returns a classified error on non-2xx, [`ServerError::Decode`] if
    /// the JSON payload is malformed.
    pub async fn initialize_client_credentials(
        &self,
        device_id: &str,
    ) -> Result<ClientCredentialsRecord> {
        #[derive(serde::Deserialize)]
        struct ClientInitPayload {
            client_id: String,
            client_secret: String,
            client_expiration: Option<i64>,
        }

        let url = self.url(CLIENT_INITIALIZE_PATH);
        let headers = vec![(
            DEVICE_ID_HEADER.to_string(),
            BASE64_STANDARD.encode(device_id),
        )];
        let form = vec![
            (
                "client_id".to_string(),
                self.options.master_client_id.clone(),
            ),
            ("nonce".to_string(), Uuid::new_v4().to_string()),
        ];

        let response = self
            .send(reqwest::Method::POST, &url, &headers, Some(&form), None)
            .await?;
        if !response.is_success() {
            return Err(ServerError::classify(&response));
        }

        let payload: ClientInitPayload = serde_json::from_slice(&response.body)
            .map_err(|e| ServerError::Decode(format!("client initialize payload: {e}")))?;
        Ok(ClientCredentialsRecord {
            master_client_id: self.options.master_client_id.clone(),
            client_id: payload.client_id,
            client_secret: SecretString::new(payload.client_secret),
            expires_at: payload.client_expiration.and_then(expiry_from_millis),
        })
    }

    // ------------------------------------------------------------------
    // Token grants
    // ------------------------------------------------------------------

    /// Exchange credentials for a token pair.
    ///
    /// The grant type and grant-specific parameters come from the
    /// credential; the dynamic client pair authenticates the client.
    ///
    /// # Errors
    ///
    /// Returns a classified error on non-2xx, [`ServerError::Decode`] if
    /// the 200 payload is malformed.
    pub async fn request_token(
        &self,
        credentials: &Credentials,
        client: &ClientAuth,
        mag_identifier: Option<&str>,
    ) -> Result<TokenGrant> {
        let mut form = vec![(
            "grant_type".to_string(),
            credentials.grant_type().to_string(),
        )];
        form.extend(credentials.params());
        self.token_call(credentials.headers(), form, client, mag_identifier)
            .await
    }

    /// Exchange a refresh token for a fresh token pair.
    ///
    /// # Errors
    ///
    /// Returns a classified error on non-2xx, [`ServerError::Decode`] if
    /// the 200 payload is malformed.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        client: &ClientAuth,
        mag_identifier: Option<&str>,
    ) -> Result<TokenGrant> {
        let form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.to_string()),
        ];
        self.token_call(Vec::new(), form, client, mag_identifier)
            .await
    }

    async fn token_call(
        &self,
        mut headers: Vec<(String, String)>,
        mut form: Vec<(String, String)>,
        client: &ClientAuth,
        mag_identifier: Option<&str>,
    ) -> Result<TokenGrant> {
        let url = self.url(self.options.token_path.as_deref().unwrap_or(TOKEN_PATH));
        if let Some(identifier) = mag_identifier {
            headers.push((MAG_IDENTIFIER_HEADER.to_string(), identifier.to_string()));
        }
        form.push(("client_id".to_string(), client.client_id.clone()));
        form.push((
            "client_secret".to_string(),
            client.client_secret.expose().to_string(),
        ));

        let response = self
            .send(reqwest::Method::POST, &url, &headers, Some(&form), None)
            .await?;
        if !response.is_success() {
            return Err(ServerError::classify(&response));
        }

        serde_json::from_slice(&response.body)
            .map_err(|e| ServerError::Decode(format!("token payload: {e}")))
    }

    // ------------------------------------------------------------------
    // Protected resources
    // ------------------------------------------------------------------

    /// Send a request against a protected gateway resource.
    ///
    /// No classification happens here: the policy chain owns the decision
    /// of what a non-2xx response means for the session.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] if the request never completes.
    pub async fn execute(&self, request: &RequestInfo) -> Result<GatewayResponse> {
        let url = self.url(&request.path);
        self.send(
            request.method.clone(),
            &url,
            &request.headers,
            None,
            request.body.clone(),
        )
        .await
    }
}

fn expiry_from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use maglink_store::pem::encode_certificate_chain;
    use wiremock::matchers::{body_string_contains, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> GatewayClient {
        let uri = server.uri();
        let port = uri.rsplit(':').next().unwrap().parse().unwrap();
        let gateway = GatewayIdentity::new("127.0.0.1", port, "").unwrap();
        let mut options = ClientOptions::new("master-client");
        options.insecure_http = true;
        GatewayClient::new(gateway, options)
    }

    fn client_auth() -> ClientAuth {
        ClientAuth {
            client_id: "dyn-id".to_string(),
            client_secret: SecretString::new("dyn-secret"),
        }
    }

    #[tokio::test]
    async fn register_device_parses_chain_and_identifier() {
        let server = MockServer::start().await;
        let chain = vec![vec![0x30u8, 0x82, 0x01]];
        Mock::given(method("POST"))
            .and(path("/connect/device/register"))
            .and(header("cert-format", "pem"))
            .and(header_exists("device-id"))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("username=alice"))
            .and(body_string_contains("certificateSigningRequest="))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("mag-identifier", "dev-123")
                    .set_body_string(encode_certificate_chain(&chain)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let device = DeviceMetadata {
            device_id: "device-1".to_string(),
            device_name: "phone".to_string(),
            msisdn: None,
        };
        let registration = client
            .register_device(&Credentials::password("alice", "pw"), &device, b"csr")
            .await
            .unwrap();

        assert_eq!(registration.mag_identifier, "dev-123");
        assert_eq!(registration.certificate_chain, chain);
    }

    #[tokio::test]
    async fn client_credentials_grant_registers_via_client_route() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/connect/device/register/client"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("mag-identifier", "dev-app")
                    .set_body_string(encode_certificate_chain(&[vec![0x30]])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let device = DeviceMetadata::generated("service");
        let registration = client
            .register_device(&Credentials::client_credentials(), &device, b"csr")
            .await
            .unwrap();
        assert_eq!(registration.mag_identifier, "dev-app");
    }

    #[tokio::test]
    async fn registration_failure_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/connect/device/register"))
            .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client
            .register_device(
                &Credentials::password("alice", "pw"),
                &DeviceMetadata::generated("phone"),
                b"csr",
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServerError::RegistrationFailed { status: 403, .. }
        ));
    }

    #[tokio::test]
    async fn registration_missing_identifier_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/connect/device/register"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(encode_certificate_chain(&[vec![0x30]])),
            )
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client
            .register_device(
                &Credentials::password("alice", "pw"),
                &DeviceMetadata::generated("phone"),
                b"csr",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Decode(_)));
    }

    #[tokio::test]
    async fn token_grant_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/oauth/v2/token"))
            .and(header("mag-identifier", "dev-123"))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("client_id=dyn-id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1",
                "refresh_token": "rt-1",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let grant = client
            .request_token(
                &Credentials::password("alice", "pw"),
                &client_auth(),
                Some("dev-123"),
            )
            .await
            .unwrap();
        assert_eq!(grant.access_token, "at-1");
        assert_eq!(grant.refresh_token, "rt-1");
        assert_eq!(grant.expires_in, 3600);
    }

    #[tokio::test]
    async fn refresh_uses_refresh_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/oauth/v2/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-2",
                "refresh_token": "rt-2",
                "expires_in": 900
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let grant = client
            .refresh_token("rt-1", &client_auth(), Some("dev-123"))
            .await
            .unwrap();
        assert_eq!(grant.access_token, "at-2");
    }

    #[tokio::test]
    async fn token_path_override_redirects_the_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/custom/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1",
                "refresh_token": "rt-1",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let uri = server.uri();
        let port = uri.rsplit(':').next().unwrap().parse().unwrap();
        let gateway = GatewayIdentity::new("127.0.0.1", port, "").unwrap();
        let mut options = ClientOptions::new("master-client");
        options.insecure_http = true;
        options.token_path = Some("/custom/oauth/token".to_string());
        let client = GatewayClient::new(gateway, options);

        let grant = client
            .request_token(&Credentials::password("alice", "pw"), &client_auth(), None)
            .await
            .unwrap();
        assert_eq!(grant.access_token, "at-1");
    }

    #[tokio::test]
    async fn token_error_decodes_vendor_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/oauth/v2/token"))
            .respond_with(ResponseTemplate::new(401).insert_header("x-ca-err", "3003201"))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client
            .request_token(&Credentials::password("alice", "pw"), &client_auth(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServerError::InvalidClientCredentials {
                code: 3_003_201,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn renew_returns_fresh_chain_on_200_only() {
        let server = MockServer::start().await;
        let fresh = vec![vec![0x31u8, 0x01]];
        Mock::given(method("PUT"))
            .and(path("/connect/device/renew"))
            .and(header("cert-format", "pem"))
            .respond_with(ResponseTemplate::new(200).set_body_string(encode_certificate_chain(&fresh)))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let chain = client.renew_device(Some("dev-123")).await.unwrap();
        assert_eq!(chain, fresh);
    }

    #[tokio::test]
    async fn renew_failure_signals_reregistration() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/connect/device/renew"))
            .respond_with(ResponseTemplate::new(403).insert_header("x-ca-err", "1000206"))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client.renew_device(None).await.unwrap_err();
        assert!(matches!(
            err,
            ServerError::DeviceRenewalFailed {
                code: 1_000_206,
                status: 403
            }
        ));
    }

    #[tokio::test]
    async fn client_initialize_parses_dynamic_pair() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/connect/client/initialize"))
            .and(body_string_contains("client_id=master-client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "client_id": "dyn-id",
                "client_secret": "dyn-secret",
                "client_expiration": 4_102_444_800_000_i64
            })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let record = client.initialize_client_credentials("device-1").await.unwrap();
        assert_eq!(record.client_id, "dyn-id");
        assert_eq!(record.master_client_id, "master-client");
        assert_eq!(record.client_secret.expose(), "dyn-secret");
        assert!(record.expires_at.is_some());
    }

    #[tokio::test]
    async fn execute_passes_through_without_classifying() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/protected"))
            .respond_with(ResponseTemplate::new(449).set_body_string("msisdn required"))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let response = client
            .execute(&RequestInfo::get("/protected"))
            .await
            .unwrap();
        assert_eq!(response.status, 449);
        assert!(response.body_text().contains("msisdn"));
    }
}
