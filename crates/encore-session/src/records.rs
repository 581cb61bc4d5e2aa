//! Exposure records and summaries.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Seconds per summary rounding step.
const MINUTE: u32 = 60;

/// Cap applied to summary durations (30 minutes).
const SUMMARY_DURATION_CAP: u32 = 1_800;

/// One day of exposure to one diagnosed key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureRecord {
    /// UTC day of the earliest observation in the group.
    pub date: NaiveDate,
    /// Duration-weighted attenuation level across the fine bucket grid.
    pub attenuation_value: u8,
    /// Transmission risk reported with the matched key.
    pub transmission_risk_level: u8,
    /// Total exposure seconds, capped at 65535.
    pub total_duration: u16,
    /// Exposure seconds per coarse attenuation bucket, each capped.
    pub attenuation_durations: [u16; 4],
}

impl ExposureRecord {
    /// Copy with durations rounded up to whole minutes and capped at 30,
    /// the shape handed out by `exposure_info`.
    #[must_use]
    pub fn rounded(&self) -> Self {
        let mut out = self.clone();
        out.total_duration = round_to_minutes(u32::from(self.total_duration)) as u16;
        for slot in &mut out.attenuation_durations {
            *slot = round_to_minutes(u32::from(*slot)) as u16;
        }
        out
    }
}

/// Aggregate over every exposure record that passed the risk gates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExposureSummary {
    /// Summed seconds per coarse attenuation bucket, rounded up to whole
    /// minutes and capped at 30 minutes each.
    pub attenuation_durations: [u16; 3],
    /// Days since the most recent admitted exposure.
    pub days_since_last_exposure: u32,
    /// Keys that produced at least one exposure record, across all files.
    pub matched_key_count: u64,
    /// Highest clamped risk score among admitted records.
    pub maximum_risk_score: u8,
    /// Highest unclamped risk score among admitted records.
    pub maximum_risk_score_full_range: f64,
    /// Sum of unclamped risk scores over admitted records.
    pub risk_score_sum_full_range: f64,
}

/// Rounds seconds up to a whole minute, capped at 30 minutes.
pub(crate) fn round_to_minutes(seconds: u32) -> u32 {
    let rounded = seconds.div_ceil(MINUTE) * MINUTE;
    rounded.min(SUMMARY_DURATION_CAP)
}
