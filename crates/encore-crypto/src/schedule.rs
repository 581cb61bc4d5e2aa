//! TEK key schedule: RPIK/AEMK derivation and RPI generation.
//!
//! Derivation follows the EN protocol exactly:
//!
//! ```text
//! RPIK = HKDF-SHA256(ikm = TEK, salt = empty, info = "EN-RPIK", L = 16)
//! AEMK = HKDF-SHA256(ikm = TEK, salt = empty, info = "EN-AEMK", L = 16)
//! RPI(i) = AES-128-ECB(RPIK, "EN-RPI" ‖ 0x00⁶ ‖ u32-LE(i))
//! ```
//!
//! A TEK covers up to 144 consecutive 10-minute intervals, so matching
//! expands each key into a batch of 144 identifiers. [`KeySchedule`] caches
//! the expanded AES round keys so the batch costs one key schedule plus 144
//! block encryptions.

use aes::Aes128;
use aes::cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::{RPI_LEN, TEK_LEN};

const RPIK_INFO: &[u8] = b"EN-RPIK";
const AEMK_INFO: &[u8] = b"EN-AEMK";

/// Fixed prefix of every RPI plaintext block.
const RPI_PAD: &[u8; 6] = b"EN-RPI";

fn hkdf16(tek: &[u8], info: &[u8]) -> Result<[u8; 16], CryptoError> {
    if tek.len() != TEK_LEN {
        return Err(CryptoError::length("tek", TEK_LEN, tek.len()));
    }
    let hk = Hkdf::<Sha256>::new(None, tek);
    let mut okm = [0u8; 16];
    hk.expand(info, &mut okm)
        .map_err(|_| CryptoError::KeyDerivation)?;
    Ok(okm)
}

/// Derives the Rolling Proximity Identifier Key for a TEK.
pub fn derive_rpik(tek: &[u8]) -> Result<[u8; 16], CryptoError> {
    hkdf16(tek, RPIK_INFO)
}

/// Derives the Associated Encrypted Metadata Key for a TEK.
pub fn derive_aemk(tek: &[u8]) -> Result<[u8; 16], CryptoError> {
    hkdf16(tek, AEMK_INFO)
}

/// Builds the 16-byte plaintext block for one interval number.
fn rpi_block(interval_number: u32) -> [u8; 16] {
    let mut block = [0u8; 16];
    block[..6].copy_from_slice(RPI_PAD);
    // bytes 6..12 stay zero
    block[12..].copy_from_slice(&interval_number.to_le_bytes());
    block
}

/// Computes the RPI a TEK broadcasts during one interval.
pub fn rpi_for(tek: &[u8], interval_number: u32) -> Result<[u8; 16], CryptoError> {
    Ok(KeySchedule::derive(tek)?.rpi_for(interval_number))
}

/// Generates `n` consecutive RPIs starting at `start_interval`.
///
/// Returns `n × 16` bytes; slot `j` holds the identifier for interval
/// `start_interval + j`. Interval numbers wrap on u32 overflow, matching
/// the on-air behavior of a key straddling the counter boundary.
pub fn batch_rpi(tek: &[u8], start_interval: u32, n: usize) -> Result<Vec<u8>, CryptoError> {
    Ok(KeySchedule::derive(tek)?.batch_rpi(start_interval, n))
}

/// Per-TEK derived key material with cached AES round keys.
///
/// Derive once per TEK, then reuse for the 144-identifier batch and any
/// number of metadata operations. The AEMK copy is wiped on drop.
pub struct KeySchedule {
    rpi_cipher: Aes128,
    aemk: Zeroizing<[u8; 16]>,
}

impl KeySchedule {
    /// Runs the HKDF schedule for one TEK.
    pub fn derive(tek: &[u8]) -> Result<Self, CryptoError> {
        let rpik = Zeroizing::new(derive_rpik(tek)?);
        let aemk = Zeroizing::new(derive_aemk(tek)?);
        let rpi_cipher = Aes128::new(GenericArray::from_slice(rpik.as_slice()));
        Ok(Self { rpi_cipher, aemk })
    }

    /// The metadata key for this TEK.
    pub(crate) fn aemk(&self) -> &[u8; 16] {
        &self.aemk
    }

    /// Computes the RPI for a single interval number.
    pub fn rpi_for(&self, interval_number: u32) -> [u8; 16] {
        let mut block = GenericArray::from(rpi_block(interval_number));
        self.rpi_cipher.encrypt_block(&mut block);
        block.into()
    }

    /// Generates `n` consecutive RPIs in one multi-block ECB pass.
    pub fn batch_rpi(&self, start_interval: u32, n: usize) -> Vec<u8> {
        let mut blocks: Vec<aes::Block> = (0..n)
            .map(|j| GenericArray::from(rpi_block(start_interval.wrapping_add(j as u32))))
            .collect();
        self.rpi_cipher.encrypt_blocks(&mut blocks);

        let mut out = Vec::with_capacity(n * RPI_LEN);
        for block in &blocks {
            out.extend_from_slice(block);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEK: [u8; 16] = [0u8; 16];

    #[test]
    fn rpik_and_aemk_differ() {
        let rpik = derive_rpik(&TEK).unwrap();
        let aemk = derive_aemk(&TEK).unwrap();
        assert_ne!(rpik, aemk);
    }

    #[test]
    fn derivation_is_deterministic() {
        assert_eq!(derive_rpik(&TEK).unwrap(), derive_rpik(&TEK).unwrap());
        assert_eq!(derive_aemk(&TEK).unwrap(), derive_aemk(&TEK).unwrap());
    }

    #[test]
    fn short_tek_rejected() {
        let err = derive_rpik(&[0u8; 15]).unwrap_err();
        assert_eq!(
            err,
            CryptoError::InvalidLength {
                what: "tek",
                expected: 16,
                actual: 15
            }
        );
    }

    #[test]
    fn single_rpi_matches_batch_slot() {
        // Interval base from a realistic rolling start number.
        let start = 2_649_600u32;
        let batch = batch_rpi(&TEK, start, 144).unwrap();
        for j in [0usize, 1, 71, 143] {
            let single = rpi_for(&TEK, start + j as u32).unwrap();
            assert_eq!(&batch[j * 16..(j + 1) * 16], &single[..]);
        }
    }

    #[test]
    fn batch_rpis_are_distinct() {
        let batch = batch_rpi(&TEK, 2_649_600, 144).unwrap();
        let mut seen = std::collections::HashSet::new();
        for chunk in batch.chunks_exact(16) {
            assert!(seen.insert(chunk.to_vec()), "duplicate RPI in batch");
        }
        assert_eq!(seen.len(), 144);
    }

    #[test]
    fn interval_number_wraps() {
        let batch = batch_rpi(&TEK, u32::MAX, 2).unwrap();
        let first = rpi_for(&TEK, u32::MAX).unwrap();
        let second = rpi_for(&TEK, 0).unwrap();
        assert_eq!(&batch[..16], &first[..]);
        assert_eq!(&batch[16..], &second[..]);
    }
}
