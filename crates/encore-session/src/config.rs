//! Exposure configuration.
//!
//! Level-value tables and weights for the four risk factors, plus the
//! thresholds that carve attenuation into duration buckets. Health
//! authorities ship these as JSON; the struct round-trips through serde
//! unchanged.

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Default coarse attenuation-duration thresholds (dB).
pub const DEFAULT_ATTENUATION_DURATION_THRESHOLDS: [u8; 2] = [50, 70];

/// Scoring parameters for a detection session.
///
/// Each level table has 8 entries indexed by a fixed bucketing of its
/// metric; each factor's contribution is the selected level value times
/// the category weight. `attenuation_duration_thresholds` takes 2 or 3
/// ascending values; the duration-bucket grid is padded to 4 bins with
/// 255.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureConfiguration {
    /// Level values indexed by fine attenuation bucket (reversed).
    pub attenuation_level_values: [u8; 8],
    /// Level values indexed by days-since-last-exposure step.
    pub days_level_values: [u8; 8],
    /// Level values indexed by cumulated-duration step.
    pub duration_level_values: [u8; 8],
    /// Level values indexed by reported transmission risk.
    pub transmission_risk_level_values: [u8; 8],
    /// Weight multiplier for the attenuation factor.
    pub attenuation_weight: f64,
    /// Weight multiplier for the days factor.
    pub days_weight: f64,
    /// Weight multiplier for the duration factor.
    pub duration_weight: f64,
    /// Weight multiplier for the transmission-risk factor.
    pub transmission_risk_weight: f64,
    /// 2 or 3 ascending attenuation thresholds (dB) for duration buckets.
    pub attenuation_duration_thresholds: Vec<u8>,
    /// Records scoring below this (clamped scale) are left out of summaries.
    pub minimum_risk_score: u8,
    /// Records scoring below this (full-range scale) are left out too.
    pub minimum_risk_score_full_range: f64,
}

impl Default for ExposureConfiguration {
    fn default() -> Self {
        Self {
            attenuation_level_values: [1, 2, 3, 4, 5, 6, 7, 8],
            days_level_values: [1, 2, 3, 4, 5, 6, 7, 8],
            duration_level_values: [1, 2, 3, 4, 5, 6, 7, 8],
            transmission_risk_level_values: [1, 2, 3, 4, 5, 6, 7, 8],
            attenuation_weight: 1.0,
            days_weight: 1.0,
            duration_weight: 1.0,
            transmission_risk_weight: 1.0,
            attenuation_duration_thresholds: DEFAULT_ATTENUATION_DURATION_THRESHOLDS.to_vec(),
            minimum_risk_score: 0,
            minimum_risk_score_full_range: 0.0,
        }
    }
}

impl ExposureConfiguration {
    /// Checks threshold arity and ordering.
    pub fn validate(&self) -> Result<(), SessionError> {
        let thresholds = &self.attenuation_duration_thresholds;
        if !(2..=3).contains(&thresholds.len()) {
            return Err(SessionError::InvalidArgument(
                "attenuation duration thresholds must have 2 or 3 entries",
            ));
        }
        if thresholds.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(SessionError::InvalidArgument(
                "attenuation duration thresholds must be ascending",
            ));
        }
        Ok(())
    }

    /// The 4-bin duration-bucket grid, padded with 255.
    #[must_use]
    pub fn duration_bucket_thresholds(&self) -> [u8; 4] {
        let mut grid = [255u8; 4];
        for (slot, threshold) in grid
            .iter_mut()
            .zip(self.attenuation_duration_thresholds.iter())
        {
            *slot = *threshold;
        }
        grid
    }
}
