//! OAuth credentials.
//!
//! [`Credentials`] is the tagged union of everything the SDK can present to
//! the gateway to register a device or obtain tokens. Each variant knows how
//! to render itself as auth headers and ordered form parameters, which grant
//! type it drives, and whether it may be presented more than once.
//!
//! Single-use variants (authorization code, bearer assertions) must not be
//! replayed: the session layer checks [`is_reusable`](Credentials::is_reusable)
//! before re-supplying credentials during recovery, and the PKCE verifier
//! behind an authorization code is consumed from the [`VerifierCache`] on
//! first render.

use std::sync::Arc;

use base64::prelude::*;
use thiserror::Error;

use crate::pkce::VerifierCache;
use crate::secret::SecretString;

/// The `grant_type` value for the password grant.
pub const GRANT_PASSWORD: &str = "password";
/// The `grant_type` value for the client-credentials grant.
pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";
/// The `grant_type` value for the authorization-code grant.
pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
/// The `grant_type` value for a JWT bearer assertion.
pub const GRANT_JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Errors raised by local credential validation, before any network call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    /// The credentials are structurally invalid (missing user name, empty
    /// code, cleared secret).
    #[error("credentials failed validation: {0}")]
    Invalid(String),

    /// A single-use credential was presented a second time.
    #[error("single-use credentials were already consumed")]
    AlreadyConsumed,
}

/// Credentials for device registration and token grants.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Resource-owner password credentials. Reusable; presented as HTTP
    /// Basic auth and as form fields for registration calls.
    Password {
        /// The resource owner's user name.
        username: String,
        /// The resource owner's password.
        password: SecretString,
    },

    /// App-only registration with no user identity. Reusable.
    ClientCredentials,

    /// A one-time authorization code, optionally paired with a PKCE
    /// verifier cached under `state`.
    AuthorizationCode {
        /// The code returned by the authorization endpoint.
        code: String,
        /// The opaque state value the verifier was cached under.
        state: String,
        /// The redirect URI the code was issued against.
        redirect_uri: Option<String>,
        /// Cache the verifier is consumed from on first render.
        verifiers: Arc<VerifierCache>,
    },

    /// A JWT assertion from an external identity provider. Single use.
    JwtBearer {
        /// The signed assertion, passed through opaquely.
        assertion: SecretString,
    },

    /// An ID token from an external identity provider. Single use.
    IdToken {
        /// The token, passed through opaquely.
        token: SecretString,
        /// The token's declared type, also used as the grant type.
        token_type: String,
    },
}

impl Credentials {
    /// Password credentials.
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Password {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }

    /// Client-credentials (app-only) credentials.
    #[must_use]
    pub const fn client_credentials() -> Self {
        Self::ClientCredentials
    }

    /// An authorization code whose PKCE verifier (if any) lives in
    /// `verifiers` under `state`.
    pub fn authorization_code(
        code: impl Into<String>,
        state: impl Into<String>,
        redirect_uri: Option<String>,
        verifiers: Arc<VerifierCache>,
    ) -> Self {
        Self::AuthorizationCode {
            code: code.into(),
            state: state.into(),
            redirect_uri,
            verifiers,
        }
    }

    /// A JWT bearer assertion.
    pub fn jwt_bearer(assertion: impl Into<String>) -> Self {
        Self::JwtBearer {
            assertion: SecretString::new(assertion.into()),
        }
    }

    /// An ID token with its declared type.
    pub fn id_token(token: impl Into<String>, token_type: impl Into<String>) -> Self {
        Self::IdToken {
            token: SecretString::new(token.into()),
            token_type: token_type.into(),
        }
    }

    /// The OAuth `grant_type` this credential drives.
    #[must_use]
    pub fn grant_type(&self) -> &str {
        match self {
            Self::Password { .. } => GRANT_PASSWORD,
            Self::ClientCredentials => GRANT_CLIENT_CREDENTIALS,
            Self::AuthorizationCode { .. } => GRANT_AUTHORIZATION_CODE,
            Self::JwtBearer { .. } => GRANT_JWT_BEARER,
            Self::IdToken { token_type, .. } => token_type,
        }
    }

    /// The principal this credential authenticates, if it names one.
    #[must_use]
    pub fn principal(&self) -> Option<&str> {
        match self {
            Self::Password { username, .. } => Some(username),
            _ => None,
        }
    }

    /// Auth headers to attach to registration and token requests.
    #[must_use]
    pub fn headers(&self) -> Vec<(String, String)> {
        match self {
            Self::Password { username, password } => {
                let framed =
                    BASE64_STANDARD.encode(format!("{username}:{}", password.expose()));
                vec![("authorization".to_string(), format!("Basic {framed}"))]
            }
            Self::IdToken { token, token_type } => vec![
                ("id-token".to_string(), token.expose().to_string()),
                ("id-token-type".to_string(), token_type.clone()),
            ],
            _ => Vec::new(),
        }
    }

    /// Ordered form parameters for registration and token requests.
    ///
    /// For an authorization code this consumes the PKCE verifier from the
    /// cache: the first call renders `code_verifier`, any later call omits
    /// it because the cache entry is gone.
    #[must_use]
    pub fn params(&self) -> Vec<(String, String)> {
        match self {
            Self::Password { username, password } => vec![
                ("username".to_string(), username.clone()),
                ("password".to_string(), password.expose().to_string()),
            ],
            Self::ClientCredentials => Vec::new(),
            Self::AuthorizationCode {
                code,
                state,
                redirect_uri,
                verifiers,
            } => {
                let mut params = vec![("code".to_string(), code.clone())];
                if let Some(uri) = redirect_uri {
                    params.push(("redirect_uri".to_string(), uri.clone()));
                }
                if let Some(verifier) = verifiers.consume(state) {
                    params.push(("code_verifier".to_string(), verifier));
                }
                params
            }
            Self::JwtBearer { assertion } => {
                vec![("assertion".to_string(), assertion.expose().to_string())]
            }
            Self::IdToken { .. } => Vec::new(),
        }
    }

    /// True if the credential is structurally complete.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Password { username, password } => {
                !username.is_empty() && !password.is_empty()
            }
            Self::ClientCredentials => true,
            Self::AuthorizationCode { code, state, .. } => {
                !code.is_empty() && !state.is_empty()
            }
            Self::JwtBearer { assertion } => !assertion.is_empty(),
            Self::IdToken { token, token_type } => {
                !token.is_empty() && !token_type.is_empty()
            }
        }
    }

    /// True if the credential may be presented more than once.
    ///
    /// Authorization codes and bearer assertions are single use; presenting
    /// them again (even inside the one-retry recovery budget) is an error.
    #[must_use]
    pub const fn is_reusable(&self) -> bool {
        matches!(self, Self::Password { .. } | Self::ClientCredentials)
    }

    /// Scrub secret material. The credential fails validation afterwards
    /// (except the secret-free client-credentials variant).
    pub fn clear(&mut self) {
        match self {
            Self::Password { password, .. } => password.clear(),
            Self::JwtBearer { assertion } => assertion.clear(),
            Self::IdToken { token, .. } => token.clear(),
            Self::ClientCredentials | Self::AuthorizationCode { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_basic_header() {
        let creds = Credentials::password("alice", "pw");
        let headers = creds.headers();
        assert_eq!(
            headers,
            vec![("authorization".to_string(), "Basic YWxpY2U6cHc=".to_string())]
        );
    }

    #[test]
    fn password_params_and_principal() {
        let creds = Credentials::password("alice", "pw");
        assert_eq!(
            creds.params(),
            vec![
                ("username".to_string(), "alice".to_string()),
                ("password".to_string(), "pw".to_string()),
            ]
        );
        assert_eq!(creds.principal(), Some("alice"));
        assert_eq!(creds.grant_type(), GRANT_PASSWORD);
        assert!(creds.is_reusable());
    }

    #[test]
    fn password_validity() {
        assert!(Credentials::password("alice", "pw").is_valid());
        assert!(!Credentials::password("", "pw").is_valid());
        assert!(!Credentials::password("alice", "").is_valid());
    }

    #[test]
    fn clear_invalidates_password() {
        let mut creds = Credentials::password("alice", "pw");
        creds.clear();
        assert!(!creds.is_valid());
    }

    #[test]
    fn client_credentials_has_no_identity() {
        let creds = Credentials::client_credentials();
        assert!(creds.headers().is_empty());
        assert!(creds.params().is_empty());
        assert_eq!(creds.grant_type(), GRANT_CLIENT_CREDENTIALS);
        assert_eq!(creds.principal(), None);
        assert!(creds.is_reusable());
    }

    #[test]
    fn authorization_code_consumes_verifier_once() {
        let verifiers = Arc::new(VerifierCache::default());
        verifiers.store("xyz", "the-verifier");

        let creds = Credentials::authorization_code(
            "code-1",
            "xyz",
            Some("app://callback".to_string()),
            verifiers,
        );
        assert!(!creds.is_reusable());

        let first = creds.params();
        assert!(first
            .iter()
            .any(|(k, v)| k == "code_verifier" && v == "the-verifier"));

        // The cache entry is gone: the verifier never renders twice.
        let second = creds.params();
        assert!(!second.iter().any(|(k, _)| k == "code_verifier"));
        assert!(second.iter().any(|(k, _)| k == "code"));
    }

    #[test]
    fn jwt_bearer_grant_and_assertion() {
        let creds = Credentials::jwt_bearer("eyJ.header.sig");
        assert_eq!(creds.grant_type(), GRANT_JWT_BEARER);
        assert!(!creds.is_reusable());
        assert_eq!(
            creds.params(),
            vec![("assertion".to_string(), "eyJ.header.sig".to_string())]
        );
    }

    #[test]
    fn id_token_headers_carry_declared_type() {
        let creds = Credentials::id_token("tok", "urn:example:id-token");
        assert_eq!(creds.grant_type(), "urn:example:id-token");
        let headers = creds.headers();
        assert!(headers.contains(&("id-token".to_string(), "tok".to_string())));
        assert!(headers.contains(&(
            "id-token-type".to_string(),
            "urn:example:id-token".to_string()
        )));
    }
}
