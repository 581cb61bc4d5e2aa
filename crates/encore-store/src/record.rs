//! Advertisement row types.

use encore_crypto::{AEM_LEN, RPI_LEN, SATURATED_RSSI};
use serde::{Deserialize, Serialize};

/// Sentinel `daily_key_index` marking a match the pipeline has rejected.
pub const INVALID_DAILY_KEY_INDEX: u32 = u32::MAX;

/// One persisted advertisement observation.
///
/// `counter` records how many raw radio reports were merged into this row
/// (always ≥ 1); `scan_interval` is the scanner's dwell window in seconds.
/// An `rssi` of 127 together with `saturated` means the radio clipped and
/// the reading carries no magnitude.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisementRecord {
    /// The 16-byte Rolling Proximity Identifier heard over the air.
    pub rpi: [u8; RPI_LEN],
    /// The 4 encrypted metadata bytes that accompanied it.
    pub encrypted_aem: [u8; AEM_LEN],
    /// Observation time, Unix seconds.
    pub timestamp: i64,
    /// Scan window length in seconds.
    pub scan_interval: u16,
    /// Received signal strength in dBm; 127 = saturated.
    pub rssi: i8,
    /// Whether the radio reported a floor/ceiling reading.
    pub saturated: bool,
    /// Number of raw reports merged into this row.
    pub counter: u8,
}

impl AdvertisementRecord {
    /// True when the RSSI sentinel marks a saturated reading.
    #[must_use]
    pub fn is_saturated_reading(&self) -> bool {
        self.rssi == SATURATED_RSSI && self.saturated
    }
}

/// A stored advertisement matched against a query's RPI buffer, annotated
/// with where in the buffer the hit landed.
///
/// `daily_key_index` identifies the TEK (buffer position / 144) and
/// `rpi_index` the slot within that key's rolling window (position mod
/// 144). The pipeline rejects a match by overwriting `daily_key_index`
/// with [`INVALID_DAILY_KEY_INDEX`]; rejected rows are skipped downstream
/// and counted in a dropped-advertisement statistic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedAdvertisement {
    /// The stored row.
    pub advertisement: AdvertisementRecord,
    /// Index of the matching TEK within the queried batch.
    pub daily_key_index: u32,
    /// Slot within the TEK's rolling window, 0..=143.
    pub rpi_index: u32,
}

impl MatchedAdvertisement {
    /// True once the pipeline has rejected this match.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.daily_key_index == INVALID_DAILY_KEY_INDEX
    }

    /// Marks this match rejected.
    pub fn reject(&mut self) {
        self.daily_key_index = INVALID_DAILY_KEY_INDEX;
    }
}
