//! TEK → RPI buffer expansion.
//!
//! A query expands its key batch into one flat buffer of `N × 144`
//! identifiers plus a parallel validity array. The store borrows both for
//! the duration of the join; position `i` maps back to key `i / 144`,
//! window slot `i mod 144`.

use std::collections::HashSet;

use tracing::warn;

use encore_crypto::{KeySchedule, MAX_ROLLING_PERIOD, RPI_LEN, TemporaryExposureKey};
use encore_store::RpiFilter;

use crate::error::SessionError;

/// Buffer positions per key (the full rolling window).
pub const SLOTS_PER_KEY: usize = MAX_ROLLING_PERIOD as usize;

/// A key batch expanded into store-query form.
///
/// Keys are deduplicated by key bytes; `daily_key_index` values returned
/// by the store index into [`RpiBuffer::teks`]. A key whose declared
/// rolling period exceeds the protocol maximum keeps its 144 slots
/// invalid and never matches.
pub struct RpiBuffer {
    /// Deduplicated keys, in first-seen order.
    pub teks: Vec<TemporaryExposureKey>,
    /// Cached key schedules, parallel to `teks`; `None` for rejected keys.
    pub schedules: Vec<Option<KeySchedule>>,
    /// `teks.len() × 144` identifiers, 16 bytes each.
    pub rpis: Vec<u8>,
    /// Which buffer positions participate in the join.
    pub validity: Vec<bool>,
    /// Number of valid positions.
    pub possible_rpi_count: usize,
}

impl RpiBuffer {
    /// Expands `teks`, gating validity through `filter` when present.
    ///
    /// Without a pre-filter every in-period slot is valid; with one, a
    /// slot is valid only when the filter cannot rule its identifier out.
    pub fn expand(
        teks: &[TemporaryExposureKey],
        filter: Option<&RpiFilter>,
    ) -> Result<Self, SessionError> {
        let mut seen: HashSet<[u8; 16]> = HashSet::with_capacity(teks.len());
        let unique: Vec<TemporaryExposureKey> = teks
            .iter()
            .filter(|tek| seen.insert(tek.key_data))
            .cloned()
            .collect();

        let mut rpis = vec![0u8; unique.len() * SLOTS_PER_KEY * RPI_LEN];
        let mut validity = vec![false; unique.len() * SLOTS_PER_KEY];
        let mut schedules = Vec::with_capacity(unique.len());
        let mut possible_rpi_count = 0usize;

        for (i, tek) in unique.iter().enumerate() {
            if tek.rolling_period_out_of_range() {
                warn!(
                    rolling_period = tek.rolling_period,
                    rolling_start_number = tek.rolling_start_number,
                    "rejecting key with out-of-range rolling period"
                );
                schedules.push(None);
                continue;
            }
            let schedule = tek.key_schedule()?;
            let base = i * SLOTS_PER_KEY;
            let batch = schedule.batch_rpi(tek.rolling_start_number, SLOTS_PER_KEY);
            rpis[base * RPI_LEN..(base + SLOTS_PER_KEY) * RPI_LEN].copy_from_slice(&batch);

            let period = tek.effective_rolling_period() as usize;
            for j in 0..period {
                let start = j * RPI_LEN;
                let rpi: [u8; RPI_LEN] = batch[start..start + RPI_LEN]
                    .try_into()
                    .map_err(|_| SessionError::InvalidArgument("rpi batch size mismatch"))?;
                if filter.is_none_or(|f| f.maybe_present(&rpi)) {
                    validity[base + j] = true;
                    possible_rpi_count += 1;
                }
            }
            schedules.push(Some(schedule));
        }

        Ok(Self {
            teks: unique,
            schedules,
            rpis,
            validity,
            possible_rpi_count,
        })
    }
}
