//! Detached signature file reader.
//!
//! A signature file is an outer sequence of `signature = 1` sub-messages,
//! each carrying the signing-key descriptor, the batch coordinates, and an
//! ASN.1/X9.62-encoded ECDSA P-256 signature over the SHA-256 of the
//! matching export file.

use crate::error::ExportError;
use crate::wire::{WIRE_LEN, WIRE_VARINT, WireCursor};

const FIELD_SIGNATURE: u32 = 1;

const SIG_FIELD_INFO: u32 = 1;
const SIG_FIELD_BATCH_NUM: u32 = 2;
const SIG_FIELD_BATCH_SIZE: u32 = 3;
const SIG_FIELD_DATA: u32 = 4;

const INFO_FIELD_APP_BUNDLE_ID: u32 = 1;
const INFO_FIELD_ANDROID_PACKAGE: u32 = 2;
const INFO_FIELD_KEY_VERSION: u32 = 3;
const INFO_FIELD_KEY_ID: u32 = 4;
const INFO_FIELD_ALGORITHM: u32 = 5;

/// Descriptor of the key a batch was signed with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureInfo {
    /// iOS bundle id the batch is scoped to.
    pub app_bundle_id: Option<String>,
    /// Android package name the batch is scoped to.
    pub android_package: Option<String>,
    /// Version of the verification key.
    pub verification_key_version: Option<String>,
    /// Identifier of the verification key.
    pub verification_key_id: Option<String>,
    /// Algorithm name, e.g. `"1.2.840.10045.4.3.2"` (ECDSA with SHA-256).
    pub signature_algorithm: Option<String>,
}

impl SignatureInfo {
    pub(crate) fn parse(frame: &[u8]) -> Result<Self, ExportError> {
        let mut cursor = WireCursor::new(frame);
        let mut info = Self::default();
        while let Some((field, wire_type)) = cursor.read_tag()? {
            if wire_type != WIRE_LEN {
                cursor.skip(wire_type)?;
                continue;
            }
            let bytes = cursor.read_length_delimited()?;
            let text = String::from_utf8(bytes.to_vec())
                .map_err(|_| ExportError::BadFormat("signature info field is not UTF-8"))?;
            match field {
                INFO_FIELD_APP_BUNDLE_ID => info.app_bundle_id = Some(text),
                INFO_FIELD_ANDROID_PACKAGE => info.android_package = Some(text),
                INFO_FIELD_KEY_VERSION => info.verification_key_version = Some(text),
                INFO_FIELD_KEY_ID => info.verification_key_id = Some(text),
                INFO_FIELD_ALGORITHM => info.signature_algorithm = Some(text),
                _ => {}
            }
        }
        Ok(info)
    }
}

/// One entry from a signature file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TekSignature {
    /// Signing-key descriptor.
    pub info: Option<SignatureInfo>,
    /// 1-based index of the export file this signature covers.
    pub batch_num: Option<u32>,
    /// Number of files in the batch.
    pub batch_size: Option<u32>,
    /// ASN.1/X9.62-encoded ECDSA signature bytes.
    pub signature: Vec<u8>,
}

impl TekSignature {
    /// True when this signature covers the given position in a batch.
    #[must_use]
    pub fn matches_batch(&self, batch_num: u32, batch_size: u32) -> bool {
        self.batch_num.is_none_or(|n| n == batch_num)
            && self.batch_size.is_none_or(|s| s == batch_size)
    }
}

/// Parsed signature file.
pub struct SignatureReader {
    signatures: Vec<TekSignature>,
}

impl SignatureReader {
    /// Parses a signature file from memory.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, ExportError> {
        let mut cursor = WireCursor::new(buf);
        let mut signatures = Vec::new();
        while let Some((field, wire_type)) = cursor.read_tag()? {
            if field == FIELD_SIGNATURE && wire_type == WIRE_LEN {
                let frame = cursor.read_length_delimited()?;
                signatures.push(Self::parse_signature(frame)?);
            } else {
                cursor.skip(wire_type)?;
            }
        }
        Ok(Self { signatures })
    }

    fn parse_signature(frame: &[u8]) -> Result<TekSignature, ExportError> {
        let mut cursor = WireCursor::new(frame);
        let mut sig = TekSignature::default();
        while let Some((field, wire_type)) = cursor.read_tag()? {
            match (field, wire_type) {
                (SIG_FIELD_INFO, WIRE_LEN) => {
                    let info_frame = cursor.read_length_delimited()?;
                    sig.info = Some(SignatureInfo::parse(info_frame)?);
                }
                (SIG_FIELD_BATCH_NUM, WIRE_VARINT) => {
                    sig.batch_num = Some(cursor.read_varint_u32()?);
                }
                (SIG_FIELD_BATCH_SIZE, WIRE_VARINT) => {
                    sig.batch_size = Some(cursor.read_varint_u32()?);
                }
                (SIG_FIELD_DATA, WIRE_LEN) => {
                    sig.signature = cursor.read_length_delimited()?.to_vec();
                }
                (_, wire_type) => cursor.skip(wire_type)?,
            }
        }
        Ok(sig)
    }

    /// All signatures in file order.
    #[must_use]
    pub fn signatures(&self) -> &[TekSignature] {
        &self.signatures
    }
}
