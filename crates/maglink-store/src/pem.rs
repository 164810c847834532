//! PEM framing for certificate material.
//!
//! The gateway issues and renews client certificates as concatenated PEM
//! `CERTIFICATE` blocks; the store persists the chain in that form and
//! decodes it back to raw DER on read. The DER itself stays opaque here;
//! X.509 parsing belongs to the injected PKI collaborator.

use base64::prelude::*;
use sha2::{Digest, Sha256};
use thiserror::Error;

const BEGIN_CERT: &str = "-----BEGIN CERTIFICATE-----";
const END_CERT: &str = "-----END CERTIFICATE-----";
const LINE_WIDTH: usize = 64;

/// Errors decoding PEM certificate material.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PemError {
    /// No `BEGIN CERTIFICATE` block was present.
    #[error("no certificate blocks found")]
    Empty,

    /// A `BEGIN CERTIFICATE` block was never closed.
    #[error("unterminated certificate block")]
    Unterminated,

    /// A block's body was not valid base64.
    #[error("invalid base64 in certificate block: {0}")]
    InvalidBase64(String),
}

/// Encode a DER certificate chain as concatenated PEM blocks.
///
/// The leaf certificate comes first, matching the order the gateway
/// returns chains in.
#[must_use]
pub fn encode_certificate_chain(chain: &[Vec<u8>]) -> String {
    let mut out = String::new();
    for der in chain {
        let body = BASE64_STANDARD.encode(der);
        out.push_str(BEGIN_CERT);
        out.push('\n');
        for line in body.as_bytes().chunks(LINE_WIDTH) {
            // chunks of ASCII base64 output are always valid UTF-8
            out.push_str(std::str::from_utf8(line).unwrap_or_default());
            out.push('\n');
        }
        out.push_str(END_CERT);
        out.push('\n');
    }
    out
}

/// Decode concatenated PEM `CERTIFICATE` blocks back to DER, leaf first.
///
/// # Errors
///
/// Returns an error if no block is present, a block is unterminated, or a
/// block body is not valid base64.
pub fn decode_certificate_chain(pem: &str) -> Result<Vec<Vec<u8>>, PemError> {
    let mut chain = Vec::new();
    let mut body: Option<String> = None;

    for line in pem.lines() {
        let line = line.trim();
        if line == BEGIN_CERT {
            body = Some(String::new());
        } else if line == END_CERT {
            let collected = body.take().ok_or(PemError::Empty)?;
            let der = BASE64_STANDARD
                .decode(collected)
                .map_err(|e| PemError::InvalidBase64(e.to_string()))?;
            chain.push(der);
        } else if let Some(buf) = body.as_mut() {
            buf.push_str(line);
        }
    }

    if body.is_some() {
        return Err(PemError::Unterminated);
    }
    if chain.is_empty() {
        return Err(PemError::Empty);
    }
    Ok(chain)
}

/// Compute the pin hash of a public key: base64 of the SHA-256 of the
/// SPKI DER bytes.
#[must_use]
pub fn public_key_pin(spki_der: &[u8]) -> String {
    BASE64_STANDARD.encode(Sha256::digest(spki_der))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_byte_exact() {
        let chain = vec![vec![0x30u8, 0x82, 0x01, 0x02, 0xff], vec![0x30u8; 100]];
        let pem = encode_certificate_chain(&chain);
        let decoded = decode_certificate_chain(&pem).unwrap();
        assert_eq!(decoded, chain);
    }

    #[test]
    fn body_lines_wrap_at_64_columns() {
        let pem = encode_certificate_chain(&[vec![0xabu8; 120]]);
        for line in pem.lines() {
            assert!(line.len() <= 64);
        }
    }

    #[test]
    fn decode_rejects_empty_input() {
        assert_eq!(decode_certificate_chain(""), Err(PemError::Empty));
        assert_eq!(
            decode_certificate_chain("not a certificate"),
            Err(PemError::Empty)
        );
    }

    #[test]
    fn decode_rejects_unterminated_block() {
        let pem = format!("{BEGIN_CERT}\nAAAA\n");
        assert_eq!(decode_certificate_chain(&pem), Err(PemError::Unterminated));
    }

    #[test]
    fn decode_rejects_bad_base64() {
        let pem = format!("{BEGIN_CERT}\n!!!!\n{END_CERT}\n");
        assert!(matches!(
            decode_certificate_chain(&pem),
            Err(PemError::InvalidBase64(_))
        ));
    }

    #[test]
    fn pin_is_stable_and_distinct() {
        let a = public_key_pin(b"spki-a");
        let b = public_key_pin(b"spki-b");
        assert_eq!(a, public_key_pin(b"spki-a"));
        assert_ne!(a, b);
        // SHA-256 digests encode to 44 base64 chars.
        assert_eq!(a.len(), 44);
    }
}
