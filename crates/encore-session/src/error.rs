//! Session error type.
//!
//! Everything fallible below the session surfaces here. Per-advertisement
//! validation failures are deliberately *not* errors: they mark the row
//! rejected and feed the dropped-advertisement statistic.

use thiserror::Error;

/// Errors surfaced by query and detection sessions.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A configuration or API parameter violated its contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Key derivation or metadata crypto failed.
    #[error(transparent)]
    Crypto(#[from] encore_crypto::CryptoError),
    /// The advertisement store failed.
    #[error(transparent)]
    Store(#[from] encore_store::StoreError),
    /// Reading a TEK export failed.
    #[error(transparent)]
    Export(#[from] encore_export::ExportError),
}
