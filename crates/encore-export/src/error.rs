//! Export reader errors.

use thiserror::Error;

/// Errors surfaced while reading export or signature files.
///
/// Clean end-of-data is not an error: the key iterator simply terminates.
/// The three framing kinds distinguish *where* a malformed length-delimited
/// stream went wrong, which matters for diagnosing truncated downloads
/// (`Underrun`) versus corrupted bytes (`Overrun`/`Range`).
#[derive(Debug, Error)]
pub enum ExportError {
    /// Reading the file from disk failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// The file does not conform to the export format.
    #[error("malformed export: {0}")]
    BadFormat(&'static str),
    /// A frame extends past the end of the data.
    #[error("record extends past end of data")]
    Underrun,
    /// A varint ran past its maximum encoded length.
    #[error("varint exceeds maximum encoded length")]
    Overrun,
    /// A decoded value does not fit the declared field width.
    #[error("field value out of range")]
    Range,
    /// The batch signature did not verify against the export bytes.
    #[error("batch signature verification failed")]
    BadSignature,
}
