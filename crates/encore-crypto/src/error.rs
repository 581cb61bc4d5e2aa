//! Crypto error type.

use thiserror::Error;

/// Errors surfaced by key derivation and metadata crypto.
///
/// Every operation in this crate fails only on a length violation (checked
/// up front) or an underlying KDF/cipher failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// An input had the wrong length.
    #[error("invalid {what} length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Which input was malformed (`"tek"`, `"rpi"`, `"aem"`).
        what: &'static str,
        /// Required length in bytes.
        expected: usize,
        /// Length actually supplied.
        actual: usize,
    },
    /// HKDF expansion failed.
    #[error("HKDF key derivation failed")]
    KeyDerivation,
}

impl CryptoError {
    pub(crate) fn length(what: &'static str, expected: usize, actual: usize) -> Self {
        Self::InvalidLength {
            what,
            expected,
            actual,
        }
    }
}
