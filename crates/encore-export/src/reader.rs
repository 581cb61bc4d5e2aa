//! TEK export file reader.
//!
//! Layout: a 16-byte identifier (`"EK Export v1    "`, space-padded)
//! followed by a record stream in protobuf wire format. Metadata fields
//! and key sub-messages interleave freely; servers are not required to
//! front-load the metadata.
//!
//! Field numbers (fixed by the published format):
//!
//! | field | tag | wire |
//! |---|---|---|
//! | start timestamp | 1 | fixed64 |
//! | end timestamp | 2 | fixed64 |
//! | region | 3 | length-delimited (UTF-8) |
//! | batch number | 4 | varint |
//! | batch size | 5 | varint |
//! | signature info | 6 | length-delimited |
//! | key | 7 | length-delimited sub-message |
//!
//! Key sub-message: `key_data = 1` (16 bytes), `transmission_risk = 2`,
//! `interval_number = 3`, `interval_count = 4` (varints; an absent count
//! means a full 144-interval day).

use std::path::Path;

use sha2::{Digest, Sha256};

use encore_crypto::{MAX_ROLLING_PERIOD, TEK_LEN, TemporaryExposureKey};

use crate::error::ExportError;
use crate::signature::SignatureInfo;
use crate::wire::{WIRE_FIXED64, WIRE_LEN, WIRE_VARINT, WireCursor};

/// The 16-byte identifier every export file starts with.
pub const EXPORT_HEADER: &[u8; 16] = b"EK Export v1    ";

const FIELD_START_TIMESTAMP: u32 = 1;
const FIELD_END_TIMESTAMP: u32 = 2;
const FIELD_REGION: u32 = 3;
const FIELD_BATCH_NUM: u32 = 4;
const FIELD_BATCH_SIZE: u32 = 5;
const FIELD_SIGNATURE_INFO: u32 = 6;
const FIELD_KEY: u32 = 7;

const KEY_FIELD_DATA: u32 = 1;
const KEY_FIELD_RISK: u32 = 2;
const KEY_FIELD_INTERVAL_NUMBER: u32 = 3;
const KEY_FIELD_INTERVAL_COUNT: u32 = 4;

/// Batch metadata collected from an export's non-key records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportMetadata {
    /// Window start, Unix seconds (as published; not validated here).
    pub start_timestamp: Option<u64>,
    /// Window end, Unix seconds.
    pub end_timestamp: Option<u64>,
    /// Region/country code the batch covers.
    pub region: Option<String>,
    /// 1-based index of this file within the batch.
    pub batch_num: Option<u32>,
    /// Number of files in the batch.
    pub batch_size: Option<u32>,
    /// Signing-key descriptors for the batch.
    pub signature_infos: Vec<SignatureInfo>,
}

/// Reader over one export file held in memory.
#[derive(Debug)]
pub struct ExportReader {
    buf: Vec<u8>,
    digest: [u8; 32],
}

impl ExportReader {
    /// Reads and validates an export file from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ExportError> {
        Self::from_bytes(std::fs::read(path)?)
    }

    /// Validates an export already in memory.
    ///
    /// Checks the identifier and computes the file's SHA-256 so signature
    /// verification later needs no second pass over the bytes.
    pub fn from_bytes(buf: Vec<u8>) -> Result<Self, ExportError> {
        if buf.len() < EXPORT_HEADER.len() || &buf[..EXPORT_HEADER.len()] != EXPORT_HEADER {
            return Err(ExportError::BadFormat("missing export identifier"));
        }
        let digest = Sha256::digest(&buf).into();
        Ok(Self { buf, digest })
    }

    /// SHA-256 of the complete file, identifier included.
    #[must_use]
    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    fn body(&self) -> &[u8] {
        &self.buf[EXPORT_HEADER.len()..]
    }

    /// Collects batch metadata.
    ///
    /// Runs on its own cursor over the record stream, so interleaved key
    /// records are skipped and a concurrent [`keys`](Self::keys) iteration
    /// keeps its position.
    pub fn metadata(&self) -> Result<ExportMetadata, ExportError> {
        let mut cursor = WireCursor::new(self.body());
        let mut meta = ExportMetadata::default();
        while let Some((field, wire_type)) = cursor.read_tag()? {
            match (field, wire_type) {
                (FIELD_START_TIMESTAMP, WIRE_FIXED64) => {
                    meta.start_timestamp = Some(cursor.read_fixed64()?);
                }
                (FIELD_END_TIMESTAMP, WIRE_FIXED64) => {
                    meta.end_timestamp = Some(cursor.read_fixed64()?);
                }
                (FIELD_REGION, WIRE_LEN) => {
                    let bytes = cursor.read_length_delimited()?;
                    let region = String::from_utf8(bytes.to_vec())
                        .map_err(|_| ExportError::BadFormat("region is not UTF-8"))?;
                    meta.region = Some(region);
                }
                (FIELD_BATCH_NUM, WIRE_VARINT) => {
                    meta.batch_num = Some(cursor.read_varint_u32()?);
                }
                (FIELD_BATCH_SIZE, WIRE_VARINT) => {
                    meta.batch_size = Some(cursor.read_varint_u32()?);
                }
                (FIELD_SIGNATURE_INFO, WIRE_LEN) => {
                    let frame = cursor.read_length_delimited()?;
                    meta.signature_infos.push(SignatureInfo::parse(frame)?);
                }
                (_, wire_type) => cursor.skip(wire_type)?,
            }
        }
        Ok(meta)
    }

    /// Lazy forward-only iterator over the file's TEKs.
    #[must_use]
    pub fn keys(&self) -> TekIterator<'_> {
        TekIterator {
            cursor: WireCursor::new(self.body()),
            failed: false,
        }
    }

    /// Verifies the batch signature over this file's bytes.
    ///
    /// `public_key_sec1` is the uncompressed X9.62 point of the server's
    /// P-256 verification key; `signature_der` is the ASN.1/X9.62-encoded
    /// ECDSA signature from the matching signature file.
    pub fn verify_signature(
        &self,
        public_key_sec1: &[u8],
        signature_der: &[u8],
    ) -> Result<(), ExportError> {
        let key = ring::signature::UnparsedPublicKey::new(
            &ring::signature::ECDSA_P256_SHA256_ASN1,
            public_key_sec1,
        );
        key.verify(&self.buf, signature_der)
            .map_err(|_| ExportError::BadSignature)
    }
}

fn parse_tek(frame: &[u8]) -> Result<TemporaryExposureKey, ExportError> {
    let mut cursor = WireCursor::new(frame);
    let mut key_data: Option<[u8; TEK_LEN]> = None;
    let mut transmission_risk: u32 = 0;
    let mut interval_number: u32 = 0;
    let mut interval_count: u32 = MAX_ROLLING_PERIOD;

    while let Some((field, wire_type)) = cursor.read_tag()? {
        match (field, wire_type) {
            (KEY_FIELD_DATA, WIRE_LEN) => {
                let bytes = cursor.read_length_delimited()?;
                let data: [u8; TEK_LEN] = bytes
                    .try_into()
                    .map_err(|_| ExportError::BadFormat("key data must be 16 bytes"))?;
                key_data = Some(data);
            }
            (KEY_FIELD_RISK, WIRE_VARINT) => {
                let risk = cursor.read_varint()?;
                transmission_risk = u32::try_from(risk).map_err(|_| ExportError::Range)?;
                if transmission_risk > u32::from(u8::MAX) {
                    return Err(ExportError::Range);
                }
            }
            (KEY_FIELD_INTERVAL_NUMBER, WIRE_VARINT) => {
                interval_number = cursor.read_varint_u32()?;
            }
            (KEY_FIELD_INTERVAL_COUNT, WIRE_VARINT) => {
                interval_count = cursor.read_varint_u32()?;
            }
            (_, wire_type) => cursor.skip(wire_type)?,
        }
    }

    let key_data = key_data.ok_or(ExportError::BadFormat("key record without key data"))?;
    Ok(TemporaryExposureKey {
        key_data,
        rolling_start_number: interval_number,
        rolling_period: interval_count,
        transmission_risk_level: transmission_risk as u8,
    })
}

/// Streams TEKs out of an export, skipping metadata records.
///
/// After the first framing error the iterator is poisoned and yields
/// nothing further; forward-only means a malformed frame boundary leaves
/// no safe place to resume from.
pub struct TekIterator<'a> {
    cursor: WireCursor<'a>,
    failed: bool,
}

impl Iterator for TekIterator<'_> {
    type Item = Result<TemporaryExposureKey, ExportError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            match self.cursor.read_tag() {
                Ok(None) => return None,
                Ok(Some((FIELD_KEY, WIRE_LEN))) => match self.cursor.read_length_delimited() {
                    Ok(frame) => return Some(parse_tek(frame)),
                    Err(err) => {
                        self.failed = true;
                        return Some(Err(err));
                    }
                },
                Ok(Some((_, wire_type))) => {
                    if let Err(err) = self.cursor.skip(wire_type) {
                        self.failed = true;
                        return Some(Err(err));
                    }
                }
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
