//! The injected X.509/PKCS#8 collaborator.
//!
//! The SDK never parses certificate material itself: key generation,
//! certification requests and public-key extraction are delegated to a
//! platform PKI implementation supplied at construction time. Certificate
//! bytes flow through the SDK as opaque DER.

use maglink_core::SecretBytes;

use crate::error::PkiError;

/// An asymmetric keypair generated for device registration.
pub struct Keypair {
    /// The private key, PKCS#8 DER. Persisted alongside the issued chain.
    pub private_key_der: SecretBytes,
    /// The public key, SPKI DER. Compared against the issued leaf
    /// certificate to enforce pairing.
    pub public_key_der: Vec<u8>,
}

/// Platform PKI operations the session layer needs.
pub trait Pki: Send + Sync {
    /// Generate a fresh keypair for device registration.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails.
    fn generate_keypair(&self) -> Result<Keypair, PkiError>;

    /// Build a certification request (DER) for `keypair` with the given
    /// subject name.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be built.
    fn certification_request(&self, keypair: &Keypair, subject: &str) -> Result<Vec<u8>, PkiError>;

    /// Extract the SPKI public key from an X.509 certificate (DER).
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be parsed.
    fn leaf_public_key(&self, cert_der: &[u8]) -> Result<Vec<u8>, PkiError>;
}
