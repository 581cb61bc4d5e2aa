//! Associated Encrypted Metadata (de)cryption and attenuation.
//!
//! The 4-byte AEM is encrypted with AES-128-CTR under the TEK's AEMK,
//! using the full 16-byte RPI as the initial counter block. Decrypted
//! layout: byte 0 is version/flags, byte 1 is the transmit power in dBm
//! (signed), bytes 2–3 are reserved.

use aes::cipher::{KeyIvInit, StreamCipher, generic_array::GenericArray};

use crate::error::CryptoError;
use crate::schedule::KeySchedule;
use crate::{AEM_LEN, RPI_LEN, SATURATED_RSSI};

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;

fn aem_apply(
    data: &[u8],
    schedule: &KeySchedule,
    rpi: &[u8],
) -> Result<[u8; AEM_LEN], CryptoError> {
    if data.len() != AEM_LEN {
        return Err(CryptoError::length("aem", AEM_LEN, data.len()));
    }
    if rpi.len() != RPI_LEN {
        return Err(CryptoError::length("rpi", RPI_LEN, rpi.len()));
    }
    let mut cipher = Aes128Ctr::new(
        GenericArray::from_slice(schedule.aemk().as_slice()),
        GenericArray::from_slice(rpi),
    );
    let mut buf = [0u8; AEM_LEN];
    buf.copy_from_slice(data);
    cipher.apply_keystream(&mut buf);
    Ok(buf)
}

/// Encrypts 4 bytes of metadata for broadcast alongside `rpi`.
pub fn encrypt_aem(metadata: &[u8], tek: &[u8], rpi: &[u8]) -> Result<[u8; AEM_LEN], CryptoError> {
    aem_apply(metadata, &KeySchedule::derive(tek)?, rpi)
}

/// Decrypts a captured AEM back to plaintext metadata.
///
/// CTR mode is its own inverse, so this is [`encrypt_aem`] with the
/// arguments read the other way around.
pub fn decrypt_aem(
    ciphertext: &[u8],
    tek: &[u8],
    rpi: &[u8],
) -> Result<[u8; AEM_LEN], CryptoError> {
    aem_apply(ciphertext, &KeySchedule::derive(tek)?, rpi)
}

/// Extracts the signed transmit power from a captured AEM.
pub fn tx_power_from_aem(encrypted_aem: &[u8], tek: &[u8], rpi: &[u8]) -> Result<i8, CryptoError> {
    let metadata = decrypt_aem(encrypted_aem, tek, rpi)?;
    Ok(metadata[1] as i8)
}

impl KeySchedule {
    /// Encrypts metadata under this schedule's AEMK.
    pub fn encrypt_aem(&self, metadata: &[u8], rpi: &[u8]) -> Result<[u8; AEM_LEN], CryptoError> {
        aem_apply(metadata, self, rpi)
    }

    /// Decrypts a captured AEM under this schedule's AEMK.
    pub fn decrypt_aem(&self, ciphertext: &[u8], rpi: &[u8]) -> Result<[u8; AEM_LEN], CryptoError> {
        aem_apply(ciphertext, self, rpi)
    }

    /// Extracts the signed transmit power from a captured AEM.
    pub fn tx_power_from_aem(&self, encrypted_aem: &[u8], rpi: &[u8]) -> Result<i8, CryptoError> {
        Ok(self.decrypt_aem(encrypted_aem, rpi)?[1] as i8)
    }

    /// Computes the path attenuation for one captured advertisement.
    ///
    /// Returns `0xFF` when the AEM cannot be decrypted (wrong length), `0`
    /// for a saturated reading, otherwise `tx_power − rssi` clamped into
    /// the u8 range.
    pub fn attenuation(&self, rpi: &[u8], encrypted_aem: &[u8], rssi: i8, saturated: bool) -> u8 {
        let Ok(tx_power) = self.tx_power_from_aem(encrypted_aem, rpi) else {
            return 0xFF;
        };
        if rssi == SATURATED_RSSI && saturated {
            return 0;
        }
        (i32::from(tx_power) - i32::from(rssi)).clamp(0, 255) as u8
    }
}

/// One-shot [`KeySchedule::attenuation`] for callers without a cached
/// schedule. A TEK of the wrong length reads as a decryption failure
/// (`0xFF`), mirroring the undecryptable-AEM case.
pub fn attenuation(tek: &[u8], rpi: &[u8], encrypted_aem: &[u8], rssi: i8, saturated: bool) -> u8 {
    match KeySchedule::derive(tek) {
        Ok(schedule) => schedule.attenuation(rpi, encrypted_aem, rssi, saturated),
        Err(_) => 0xFF,
    }
}
