//! # encore-export
//!
//! Readers for the two files a diagnosis server publishes: the TEK export
//! (a 16-byte identifier followed by a length-delimited record stream) and
//! the detached signature file covering it.
//!
//! The export reader is lazy and forward-only: keys stream out one at a
//! time without materializing the whole batch. Metadata records may appear
//! anywhere in the stream, so they are collected on a separate pass over
//! an independent cursor and key iteration never has to back up.
//! Opening a file also computes its SHA-256 up front, so batch signature
//! verification needs no second read of the file.

mod wire;

pub mod error;
pub mod reader;
pub mod signature;

pub use error::ExportError;
pub use reader::{EXPORT_HEADER, ExportMetadata, ExportReader, TekIterator};
pub use signature::{SignatureInfo, SignatureReader, TekSignature};
