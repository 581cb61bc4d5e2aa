//! Multiplicative risk estimation.
//!
//! `risk = Aₗ × Dₗ × Uₗ × Tₗ`, each factor a configured level value times
//! its category weight. The attenuation factor is linear in the record's
//! duration-weighted attenuation value (the level table was already
//! applied during bucketing); days, duration, and transmission risk step
//! through their 8-entry tables.

use crate::config::ExposureConfiguration;
use crate::records::ExposureRecord;

/// Risk of one exposure record on both output scales.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskScore {
    /// `round(risk)` clamped into 0..=255.
    pub clamped: u8,
    /// The unclamped product.
    pub full_range: f64,
}

impl RiskScore {
    /// Whether this score passes both minimum-score gates.
    #[must_use]
    pub fn admitted(&self, config: &ExposureConfiguration) -> bool {
        self.clamped >= config.minimum_risk_score
            && self.full_range >= config.minimum_risk_score_full_range
    }
}

/// Level-table index for days since last exposure; higher day counts
/// select lower indices.
fn days_index(days: i64) -> usize {
    match days {
        d if d >= 14 => 0,
        d if d >= 12 => 1,
        d if d >= 10 => 2,
        d if d >= 8 => 3,
        d if d >= 6 => 4,
        d if d >= 4 => 5,
        d if d >= 2 => 6,
        _ => 7,
    }
}

/// Level-table index for cumulated exposure minutes.
fn duration_index(minutes: f64) -> usize {
    match minutes {
        m if m <= 0.0 => 0,
        m if m <= 5.0 => 1,
        m if m <= 10.0 => 2,
        m if m <= 15.0 => 3,
        m if m <= 20.0 => 4,
        m if m <= 25.0 => 5,
        m if m <= 30.0 => 6,
        _ => 7,
    }
}

/// Scores one exposure record.
#[must_use]
pub fn risk_score(
    record: &ExposureRecord,
    days_since_exposure: i64,
    config: &ExposureConfiguration,
) -> RiskScore {
    let attenuation = f64::from(record.attenuation_value) * config.attenuation_weight;
    let days =
        f64::from(config.days_level_values[days_index(days_since_exposure)]) * config.days_weight;
    let minutes = f64::from(record.total_duration) / 60.0;
    let duration =
        f64::from(config.duration_level_values[duration_index(minutes)]) * config.duration_weight;
    let risk_index = usize::from(record.transmission_risk_level.min(7));
    let transmission = f64::from(config.transmission_risk_level_values[risk_index])
        * config.transmission_risk_weight;

    let full_range = attenuation * days * duration * transmission;
    let clamped = full_range.round().clamp(0.0, 255.0) as u8;
    RiskScore {
        clamped,
        full_range,
    }
}
