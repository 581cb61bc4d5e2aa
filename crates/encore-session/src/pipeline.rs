//! Post-processing of raw store matches.
//!
//! Stages, in order: per-row rejection (age, interval consistency,
//! attenuation gate), temporal merging of near-simultaneous observations,
//! scan-interval clamping, plausibility filters, and attenuation
//! bucketing into one [`ExposureRecord`] per key group.
//!
//! Rejection never removes rows; it overwrites `daily_key_index` with the
//! invalid sentinel so grouping can still walk the match list in scan
//! order.

use std::collections::HashMap;

use chrono::DateTime;
use tracing::debug;

use encore_crypto::{ENIN_SECONDS, KeySchedule, SATURATED_RSSI};
use encore_store::MatchedAdvertisement;

use crate::config::ExposureConfiguration;
use crate::expand::RpiBuffer;
use crate::records::ExposureRecord;
use crate::{ENIN_TOLERANCE, RETENTION_SECONDS};

/// Fine attenuation bucket grid, dB upper bounds.
pub(crate) const FINE_ATTENUATION_THRESHOLDS: [u8; 8] = [10, 15, 27, 33, 51, 63, 73, 255];

/// Observations this close together collapse into one.
const MERGE_GAP_SECONDS: i64 = 4;

/// An RPI nominally broadcasts for at most this long.
const BROADCAST_WINDOW_SECONDS: i64 = 20 * 60;

/// Plausible transmit power range, dBm.
const TX_POWER_MIN: i8 = -60;
const TX_POWER_MAX: i8 = 20;

const DURATION_CAP: u32 = u16::MAX as u32;

/// One observation as the merge and bucketing stages see it.
///
/// `counter` widens past u8 because folded rows accumulate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CombinedAdvertisement {
    pub rpi: [u8; 16],
    pub encrypted_aem: [u8; 4],
    pub timestamp: i64,
    pub scan_interval: u16,
    pub rssi: i8,
    pub saturated: bool,
    pub counter: u32,
}

impl From<&MatchedAdvertisement> for CombinedAdvertisement {
    fn from(m: &MatchedAdvertisement) -> Self {
        let ad = &m.advertisement;
        Self {
            rpi: ad.rpi,
            encrypted_aem: ad.encrypted_aem,
            timestamp: ad.timestamp,
            scan_interval: ad.scan_interval,
            rssi: ad.rssi,
            saturated: ad.saturated,
            counter: u32::from(ad.counter),
        }
    }
}

/// Applies the per-row rejection rules in place; returns how many rows
/// were marked invalid.
pub(crate) fn apply_rejections(
    matches: &mut [MatchedAdvertisement],
    buffer: &RpiBuffer,
    now: i64,
    attenuation_threshold: u8,
) -> u64 {
    let mut dropped = 0u64;
    for m in matches.iter_mut() {
        let index = m.daily_key_index as usize;
        let (Some(tek), Some(schedule)) = (
            buffer.teks.get(index),
            buffer.schedules.get(index).and_then(|s| s.as_ref()),
        ) else {
            m.reject();
            dropped += 1;
            continue;
        };

        let ad = &m.advertisement;

        // Outside the 14-day retention window.
        if now - ad.timestamp >= RETENTION_SECONDS {
            m.reject();
            dropped += 1;
            continue;
        }

        // The observation time must sit within ±2 hours of the interval
        // the identifier was generated for.
        let expected_enin = i64::from(tek.rolling_start_number) + i64::from(m.rpi_index);
        let observed_enin = ad.timestamp.div_euclid(ENIN_SECONDS);
        if (observed_enin - expected_enin).abs() > ENIN_TOLERANCE {
            m.reject();
            dropped += 1;
            continue;
        }

        let att = schedule.attenuation(&ad.rpi, &ad.encrypted_aem, ad.rssi, ad.saturated);
        if att >= attenuation_threshold {
            m.reject();
            dropped += 1;
        }
    }
    dropped
}

fn fold_into(prev: &mut CombinedAdvertisement, next: &CombinedAdvertisement) {
    let rssi = if prev.rssi == SATURATED_RSSI || next.rssi == SATURATED_RSSI {
        prev.rssi.min(next.rssi)
    } else {
        let total = i64::from(prev.counter) + i64::from(next.counter);
        let weighted = i64::from(prev.rssi) * i64::from(prev.counter)
            + i64::from(next.rssi) * i64::from(next.counter);
        (weighted / total) as i8
    };
    prev.rssi = rssi;
    prev.saturated = rssi == SATURATED_RSSI;
    prev.counter += next.counter;
}

/// Sorts by timestamp and folds observations within the merge window into
/// their predecessor.
pub(crate) fn merge_observations(
    mut ads: Vec<CombinedAdvertisement>,
) -> Vec<CombinedAdvertisement> {
    ads.sort_by_key(|ad| ad.timestamp);
    let mut merged: Vec<CombinedAdvertisement> = Vec::with_capacity(ads.len());
    for ad in ads {
        if let Some(prev) = merged.last_mut() {
            if ad.timestamp - prev.timestamp <= MERGE_GAP_SECONDS {
                fold_into(prev, &ad);
                continue;
            }
        }
        merged.push(ad);
    }
    merged
}

/// Truncates scan intervals that would reach back past the previous
/// observation.
pub(crate) fn clamp_scan_intervals(ads: &mut [CombinedAdvertisement]) {
    for i in 1..ads.len() {
        let prev_ts = ads[i - 1].timestamp;
        let ad = &mut ads[i];
        if prev_ts > ad.timestamp - i64::from(ad.scan_interval) {
            ad.scan_interval = (ad.timestamp - prev_ts).clamp(0, i64::from(u16::MAX)) as u16;
        }
    }
}

/// Drops implausible observations: out-of-range transmit power,
/// zero-loss attenuation, and anything past an RPI's nominal broadcast
/// window. Expects the input sorted by time.
pub(crate) fn filter_implausible(
    ads: Vec<CombinedAdvertisement>,
    schedule: &KeySchedule,
    dropped: &mut u64,
) -> Vec<CombinedAdvertisement> {
    let mut first_seen: HashMap<[u8; 16], i64> = HashMap::new();
    let mut out = Vec::with_capacity(ads.len());
    for ad in ads {
        let Ok(tx_power) = schedule.tx_power_from_aem(&ad.encrypted_aem, &ad.rpi) else {
            *dropped += 1;
            continue;
        };
        if !(TX_POWER_MIN..=TX_POWER_MAX).contains(&tx_power) {
            *dropped += 1;
            continue;
        }
        // Attenuation 0 would mean a zero-loss path. A saturated reading
        // is exempt: its 0 is the sentinel, not a measurement.
        if ad.rssi != SATURATED_RSSI {
            let att = schedule.attenuation(&ad.rpi, &ad.encrypted_aem, ad.rssi, ad.saturated);
            if att == 0 {
                *dropped += 1;
                continue;
            }
        }
        let first = *first_seen.entry(ad.rpi).or_insert(ad.timestamp);
        if ad.timestamp - first > BROADCAST_WINDOW_SECONDS {
            *dropped += 1;
            continue;
        }
        out.push(ad);
    }
    out
}

/// Buckets one key group's surviving observations into an exposure record.
///
/// Saturated observations count toward the total duration but toward
/// neither bucket grid. Returns `None` for an empty group.
pub(crate) fn build_record(
    ads: &[CombinedAdvertisement],
    schedule: &KeySchedule,
    transmission_risk_level: u8,
    config: &ExposureConfiguration,
) -> Option<ExposureRecord> {
    if ads.is_empty() {
        return None;
    }
    let grid = config.duration_bucket_thresholds();
    let mut durations = [0u32; 4];
    let mut total = 0u32;
    let mut weighted_sum = 0u64;
    let mut weight_total = 0u64;
    let mut earliest = i64::MAX;

    for ad in ads {
        earliest = earliest.min(ad.timestamp);
        let duration = u32::from(ad.scan_interval);
        total = (total + duration).min(DURATION_CAP);
        if ad.rssi == SATURATED_RSSI {
            continue;
        }
        let att = schedule.attenuation(&ad.rpi, &ad.encrypted_aem, ad.rssi, ad.saturated);

        let bin = grid.iter().position(|t| att <= *t).unwrap_or(3);
        durations[bin] = (durations[bin] + duration).min(DURATION_CAP);

        let fine = FINE_ATTENUATION_THRESHOLDS
            .iter()
            .position(|t| att <= *t)
            .unwrap_or(7);
        let level = config.attenuation_level_values[7 - fine];
        weighted_sum += u64::from(duration) * u64::from(level);
        weight_total += u64::from(duration);
    }

    let attenuation_value = if weight_total == 0 {
        0
    } else {
        (weighted_sum as f64 / weight_total as f64).round() as u8
    };
    let date = DateTime::from_timestamp(earliest, 0)?.date_naive();
    Some(ExposureRecord {
        date,
        attenuation_value,
        transmission_risk_level,
        total_duration: total as u16,
        attenuation_durations: durations.map(|d| d as u16),
    })
}

/// Walks the match list in scan order and produces one exposure record
/// per key group with any surviving observations.
pub(crate) fn build_exposure_records(
    matches: &[MatchedAdvertisement],
    buffer: &RpiBuffer,
    config: &ExposureConfiguration,
    dropped: &mut u64,
) -> Vec<ExposureRecord> {
    let mut records = Vec::new();
    let mut current: Option<u32> = None;
    let mut group: Vec<CombinedAdvertisement> = Vec::new();

    let flush = |key: Option<u32>, group: &mut Vec<CombinedAdvertisement>, dropped: &mut u64| {
        let key = key?;
        let taken = std::mem::take(group);
        let index = key as usize;
        let schedule = buffer.schedules.get(index).and_then(|s| s.as_ref())?;
        let tek = buffer.teks.get(index)?;

        let mut merged = merge_observations(taken);
        clamp_scan_intervals(&mut merged);
        let surviving = filter_implausible(merged, schedule, dropped);
        build_record(&surviving, schedule, tek.transmission_risk_level, config)
    };

    for m in matches {
        if m.is_rejected() {
            continue;
        }
        if current != Some(m.daily_key_index) {
            if let Some(record) = flush(current, &mut group, dropped) {
                records.push(record);
            }
            current = Some(m.daily_key_index);
        }
        group.push(CombinedAdvertisement::from(m));
    }
    if let Some(record) = flush(current, &mut group, dropped) {
        records.push(record);
    }

    debug!(
        groups = records.len(),
        dropped, "exposure record construction complete"
    );
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use encore_crypto::TemporaryExposureKey;
    use encore_store::AdvertisementRecord;

    const TEK: [u8; 16] = [0x42; 16];
    const START: u32 = 2_649_600;

    fn schedule() -> KeySchedule {
        KeySchedule::derive(&TEK).unwrap()
    }

    /// An observation of slot `slot` with a real AEM for `tx_power`.
    fn observation(slot: u32, timestamp: i64, rssi: i8, tx_power: i8) -> CombinedAdvertisement {
        let s = schedule();
        let rpi = s.rpi_for(START + slot);
        let encrypted_aem = s.encrypt_aem(&[0x40, tx_power as u8, 0, 0], &rpi).unwrap();
        CombinedAdvertisement {
            rpi,
            encrypted_aem,
            timestamp,
            scan_interval: 4,
            rssi,
            saturated: rssi == SATURATED_RSSI,
            counter: 1,
        }
    }

    // -- temporal merging -------------------------------------------------

    #[test]
    fn close_observations_fold_with_weighted_rssi() {
        let a = observation(0, 1_000, -60, 0);
        let mut b = observation(0, 1_003, -70, 0);
        b.scan_interval = 9;
        let merged = merge_observations(vec![a, b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].counter, 2);
        assert_eq!(merged[0].rssi, -65);
        assert_eq!(merged[0].timestamp, 1_000);
        // The fold target's scan interval is left untouched.
        assert_eq!(merged[0].scan_interval, 4);
    }

    #[test]
    fn distant_observations_stay_separate() {
        let a = observation(0, 1_000, -60, 0);
        let b = observation(0, 1_005, -70, 0);
        assert_eq!(merge_observations(vec![a, b]).len(), 2);
    }

    #[test]
    fn saturated_fold_takes_smaller_rssi() {
        let mut a = observation(0, 1_000, SATURATED_RSSI, 0);
        a.saturated = true;
        let b = observation(0, 1_002, -70, 0);
        let merged = merge_observations(vec![a, b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].rssi, -70);
        assert!(!merged[0].saturated);
    }

    #[test]
    fn merge_is_idempotent() {
        let ads = vec![
            observation(0, 1_000, -60, 0),
            observation(0, 1_003, -70, 0),
            observation(0, 1_100, -55, 0),
        ];
        let once = merge_observations(ads);
        let twice = merge_observations(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn weighted_rssi_respects_counters() {
        let mut a = observation(0, 1_000, -60, 0);
        a.counter = 3;
        let b = observation(0, 1_001, -80, 0);
        let merged = merge_observations(vec![a, b]);
        // (-60*3 + -80*1) / 4 = -65
        assert_eq!(merged[0].rssi, -65);
        assert_eq!(merged[0].counter, 4);
    }

    // -- scan-interval clamping -------------------------------------------

    #[test]
    fn overlapping_scan_interval_truncates() {
        let a = observation(0, 1_000, -60, 0);
        let mut b = observation(0, 1_010, -60, 0);
        b.scan_interval = 30; // reaches back to 980, past a
        let mut ads = vec![a, b];
        clamp_scan_intervals(&mut ads);
        assert_eq!(ads[1].scan_interval, 10);
        assert_eq!(ads[0].scan_interval, 4);
    }

    #[test]
    fn non_overlapping_scan_interval_untouched() {
        let a = observation(0, 1_000, -60, 0);
        let mut b = observation(0, 1_100, -60, 0);
        b.scan_interval = 30;
        let mut ads = vec![a, b];
        clamp_scan_intervals(&mut ads);
        assert_eq!(ads[1].scan_interval, 30);
    }

    // -- plausibility filters ---------------------------------------------

    #[test]
    fn out_of_range_tx_power_dropped() {
        let s = schedule();
        let mut dropped = 0;
        let kept = filter_implausible(vec![observation(0, 1_000, -50, -80)], &s, &mut dropped);
        assert!(kept.is_empty());
        assert_eq!(dropped, 1);

        let mut dropped = 0;
        let kept = filter_implausible(vec![observation(0, 1_000, -50, 20)], &s, &mut dropped);
        assert_eq!(kept.len(), 1);
        assert_eq!(dropped, 0);
    }

    #[test]
    fn zero_attenuation_dropped() {
        let s = schedule();
        // tx 0, rssi 0 → attenuation 0: implausible zero-loss path.
        let mut dropped = 0;
        let kept = filter_implausible(vec![observation(0, 1_000, 0, 0)], &s, &mut dropped);
        assert!(kept.is_empty());
        assert_eq!(dropped, 1);
    }

    #[test]
    fn broadcast_window_closes_after_twenty_minutes() {
        let s = schedule();
        let ads = vec![
            observation(0, 0, -50, 0),
            observation(0, 600, -50, 0),
            observation(0, 1_300, -50, 0),
        ];
        let mut dropped = 0;
        let kept = filter_implausible(ads, &s, &mut dropped);
        assert_eq!(kept.len(), 2);
        assert_eq!(dropped, 1);
        assert!(kept.iter().all(|ad| ad.timestamp <= 1_200));
    }

    #[test]
    fn saturated_reading_passes_attenuation_filter() {
        let s = schedule();
        let mut sat = observation(0, 1_000, SATURATED_RSSI, 0);
        sat.saturated = true;
        let mut dropped = 0;
        let kept = filter_implausible(vec![sat], &s, &mut dropped);
        assert_eq!(kept.len(), 1);
    }

    // -- bucketing --------------------------------------------------------

    #[test]
    fn saturated_duration_counts_only_toward_total() {
        let s = schedule();
        let config = ExposureConfiguration::default();
        let mut sat = observation(0, 1_000, SATURATED_RSSI, 0);
        sat.saturated = true;
        sat.scan_interval = 120;
        let mut real = observation(0, 2_000, -50, 0); // attenuation 50
        real.scan_interval = 60;

        let record = build_record(&[sat, real], &s, 4, &config).unwrap();
        assert_eq!(record.total_duration, 180);
        let bucketed: u32 = record
            .attenuation_durations
            .iter()
            .map(|d| u32::from(*d))
            .sum();
        assert_eq!(bucketed, 60);
        assert!(bucketed <= u32::from(record.total_duration));
    }

    #[test]
    fn fine_buckets_index_level_table_reversed() {
        let s = schedule();
        let config = ExposureConfiguration::default();
        // tx 0, rssi -5 → attenuation 5 → fine bucket 0 → reversed
        // index 7 → level value 8.
        let ad = observation(0, 1_000, -5, 0);
        let record = build_record(&[ad], &s, 0, &config).unwrap();
        assert_eq!(record.attenuation_value, 8);

        // tx 0, rssi -80 → attenuation 80 → fine bucket 7 → level value 1.
        let far = observation(0, 1_000, -80, 0);
        let record = build_record(&[far], &s, 0, &config).unwrap();
        assert_eq!(record.attenuation_value, 1);
    }

    #[test]
    fn duration_weighted_attenuation_value() {
        let s = schedule();
        let config = ExposureConfiguration::default();
        // 60 s at level 8 (attenuation 5) + 120 s at level 1 (attenuation 80):
        // round((60*8 + 120*1) / 180) = round(3.33) = 3.
        let mut near = observation(0, 1_000, -5, 0);
        near.scan_interval = 60;
        let mut far = observation(0, 2_000, -80, 0);
        far.scan_interval = 120;
        let record = build_record(&[near, far], &s, 0, &config).unwrap();
        assert_eq!(record.attenuation_value, 3);
    }

    #[test]
    fn record_date_floors_to_utc_day() {
        let s = schedule();
        let config = ExposureConfiguration::default();
        // 2020-09-01 13:26:40 UTC
        let ad = observation(0, 1_598_966_800, -50, 0);
        let record = build_record(&[ad], &s, 0, &config).unwrap();
        assert_eq!(
            record.date,
            chrono::NaiveDate::from_ymd_opt(2020, 9, 1).unwrap()
        );
    }

    #[test]
    fn empty_group_yields_no_record() {
        let s = schedule();
        let config = ExposureConfiguration::default();
        assert!(build_record(&[], &s, 0, &config).is_none());
    }

    // -- rejection rules --------------------------------------------------

    fn matched(slot: u32, timestamp: i64, rssi: i8) -> encore_store::MatchedAdvertisement {
        let s = schedule();
        let rpi = s.rpi_for(START + slot);
        let encrypted_aem = s.encrypt_aem(&[0x40, 0, 0, 0], &rpi).unwrap();
        encore_store::MatchedAdvertisement {
            advertisement: AdvertisementRecord {
                rpi,
                encrypted_aem,
                timestamp,
                scan_interval: 4,
                rssi,
                saturated: false,
                counter: 1,
            },
            daily_key_index: 0,
            rpi_index: slot,
        }
    }

    fn test_buffer() -> RpiBuffer {
        let tek = TemporaryExposureKey::new(TEK, START);
        RpiBuffer::expand(std::slice::from_ref(&tek), None).unwrap()
    }

    #[test]
    fn age_cutoff_boundary() {
        let buffer = test_buffer();
        // Within slot 0's own interval, so the consistency check passes
        // and only the age rule decides.
        let ts = i64::from(START) * ENIN_SECONDS + 60;

        // Exactly 14 days old: dropped.
        let mut matches = vec![matched(0, ts, -50)];
        let dropped = apply_rejections(&mut matches, &buffer, ts + RETENTION_SECONDS, 0xFF);
        assert!(matches[0].is_rejected());
        assert_eq!(dropped, 1);

        // One second inside the window: kept.
        let mut matches = vec![matched(0, ts, -50)];
        apply_rejections(&mut matches, &buffer, ts + RETENTION_SECONDS - 1, 0xFF);
        assert!(!matches[0].is_rejected());
    }

    #[test]
    fn enin_tolerance_boundary() {
        let buffer = test_buffer();
        let slot = 12u32;
        let slot_enin = i64::from(START) + i64::from(slot);

        // Exactly 12 intervals late: kept.
        let ts_at_12 = (slot_enin + 12) * ENIN_SECONDS;
        // 13 intervals late: dropped.
        let ts_at_13 = (slot_enin + 13) * ENIN_SECONDS;
        let now = ts_at_13 + 600;

        let mut matches = vec![matched(slot, ts_at_12, -50), matched(slot, ts_at_13, -50)];
        let dropped = apply_rejections(&mut matches, &buffer, now, 0xFF);
        assert!(!matches[0].is_rejected());
        assert!(matches[1].is_rejected());
        assert_eq!(dropped, 1);
    }

    #[test]
    fn attenuation_gate_rejects_at_threshold() {
        let buffer = test_buffer();
        let slot = 0u32;
        let ts = i64::from(START) * ENIN_SECONDS + 60;
        let now = ts + 600;

        // tx 0, rssi -50 → attenuation 50.
        let mut matches = vec![matched(slot, ts, -50)];
        apply_rejections(&mut matches, &buffer, now, 50);
        assert!(matches[0].is_rejected());

        let mut matches = vec![matched(slot, ts, -50)];
        apply_rejections(&mut matches, &buffer, now, 51);
        assert!(!matches[0].is_rejected());
    }
}
