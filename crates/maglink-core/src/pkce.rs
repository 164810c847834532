//! PKCE (RFC 7636) verifier generation and the short-lived verifier cache.
//!
//! The authorization front end stores a code verifier under the opaque
//! `state` value it sends to the gateway; the authorization-code credential
//! consumes it exactly once when the code is exchanged. A consumed or
//! expired entry is gone, so a second read yields nothing.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::prelude::*;
use parking_lot::Mutex;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::secret::SecretString;

/// Default lifetime of a cached verifier.
pub const DEFAULT_VERIFIER_TTL: Duration = Duration::from_secs(300);

/// Generate a PKCE code verifier (32 random bytes, base64url, 43 chars).
#[must_use]
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate an opaque `state` value for an authorization request.
#[must_use]
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute `code_challenge = base64url_nopad(sha256(verifier))` (S256).
#[must_use]
pub fn code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    BASE64_URL_SAFE_NO_PAD.encode(hash)
}

struct Entry {
    verifier: SecretString,
    stored_at: Instant,
}

/// Short-lived cache of PKCE verifiers keyed by `state`.
///
/// Entries are removed on read, so each verifier can be consumed at most
/// once; stale entries are dropped lazily on access.
pub struct VerifierCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl VerifierCache {
    /// Create a cache with the given entry lifetime.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Generate and store a verifier for `state`, returning its S256
    /// challenge for the authorization request.
    pub fn issue(&self, state: &str) -> String {
        let verifier = generate_verifier();
        let challenge = code_challenge(&verifier);
        self.store(state, verifier);
        challenge
    }

    /// Store an externally generated verifier under `state`.
    pub fn store(&self, state: &str, verifier: impl Into<String>) {
        let mut entries = self.entries.lock();
        entries.retain(|_, e| e.stored_at.elapsed() < self.ttl);
        entries.insert(
            state.to_string(),
            Entry {
                verifier: SecretString::new(verifier.into()),
                stored_at: Instant::now(),
            },
        );
    }

    /// Consume the verifier stored under `state`.
    ///
    /// The entry is removed; a second call for the same state returns
    /// `None`, as does a call after the entry expired.
    #[must_use]
    pub fn consume(&self, state: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        let entry = entries.remove(state)?;
        if entry.stored_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.verifier.expose().to_string())
    }
}

impl Default for VerifierCache {
    fn default() -> Self {
        Self::new(DEFAULT_VERIFIER_TTL)
    }
}

impl std::fmt::Debug for VerifierCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifierCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}
