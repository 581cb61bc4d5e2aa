//! # encore-crypto
//!
//! Key schedule and metadata crypto for the Exposure Notification
//! detection core.
//!
//! A diagnosed user's Temporary Exposure Key (TEK) expands into two derived
//! keys: the Rolling Proximity Identifier Key (RPIK), which generates the
//! 16-byte identifiers broadcast over BLE, and the Associated Encrypted
//! Metadata Key (AEMK), which protects the 4-byte metadata (version +
//! tx-power) that rides along with each identifier.
//!
//! All derivations are deterministic: HKDF-SHA256 for the key schedule,
//! AES-128-ECB for identifier generation, AES-128-CTR for metadata. The AES
//! implementation is constant-time (bitsliced/AES-NI via the `aes` crate);
//! nothing in this crate branches on secret data.

pub mod aem;
pub mod error;
pub mod schedule;
pub mod tek;

pub use aem::{attenuation, decrypt_aem, encrypt_aem, tx_power_from_aem};
pub use error::CryptoError;
pub use schedule::{KeySchedule, batch_rpi, derive_aemk, derive_rpik, rpi_for};
pub use tek::TemporaryExposureKey;

/// Length of a Temporary Exposure Key in bytes.
pub const TEK_LEN: usize = 16;

/// Length of a Rolling Proximity Identifier in bytes.
pub const RPI_LEN: usize = 16;

/// Length of the Associated Encrypted Metadata in bytes.
pub const AEM_LEN: usize = 4;

/// Number of 10-minute intervals in a TEK's full rolling window (24 h).
pub const MAX_ROLLING_PERIOD: u32 = 144;

/// Seconds per Exposure Notification Interval Number (ENIN).
pub const ENIN_SECONDS: i64 = 600;

/// RSSI sentinel reported by the radio when the reading saturated.
///
/// A saturated reading carries no magnitude information; downstream
/// processing must not treat it as a real signal strength.
pub const SATURATED_RSSI: i8 = 127;
