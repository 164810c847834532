//! Scrub-on-drop secret material.
//!
//! Credentials and key material are held in wrappers whose backing buffers
//! are zeroed both on [`Drop`] and on explicit [`clear`](SecretString::clear),
//! so secrets do not linger in freed memory. `Debug` and `Display` always
//! redact.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// A secret string (password, token, assertion).
///
/// Use [`expose`](Self::expose) for controlled access when building auth
/// headers or form bodies; callers must not log or persist the returned
/// slice.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a plain value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Read-only access to the underlying secret.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// True if no secret is held (empty or already cleared).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Zero the backing buffer and leave the wrapper empty.
    pub fn clear(&mut self) {
        self.0.zeroize();
    }
}

impl Clone for SecretString {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Secret raw bytes (private keys, decoded key material).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    /// Wrap a byte buffer.
    #[must_use]
    pub fn new(value: Vec<u8>) -> Self {
        Self(value)
    }

    /// Read-only access to the underlying bytes.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    /// True if no material is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Zero the backing buffer and leave the wrapper empty.
    pub fn clear(&mut self) {
        self.0.zeroize();
        self.0 = Vec::new();
    }
}

impl Clone for SecretBytes {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<Vec<u8>> for SecretBytes {
    fn from(value: Vec<u8>) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_and_display_redact() {
        let s = SecretString::new("hunter2");
        assert_eq!(format!("{s:?}"), "[REDACTED]");
        assert_eq!(format!("{s}"), "[REDACTED]");
        assert!(!format!("{s:?}").contains("hunter2"));
    }

    #[test]
    fn expose_returns_value() {
        let s = SecretString::new("hunter2");
        assert_eq!(s.expose(), "hunter2");
    }

    #[test]
    fn clear_empties_string() {
        let mut s = SecretString::new("hunter2");
        s.clear();
        assert!(s.is_empty());
        assert_eq!(s.expose(), "");
    }

    #[test]
    fn bytes_clear_empties_buffer() {
        let mut b = SecretBytes::new(vec![1, 2, 3]);
        assert_eq!(b.expose(), &[1, 2, 3]);
        b.clear();
        assert!(b.is_empty());
    }

    #[test]
    fn bytes_debug_redacts() {
        let b = SecretBytes::new(vec![0xde, 0xad]);
        assert_eq!(format!("{b:?}"), "[REDACTED]");
    }
}
