//! Detection session: export files in, summary out.

use std::sync::Arc;

use chrono::DateTime;

use encore_crypto::TemporaryExposureKey;
use encore_export::ExportReader;
use encore_store::AdvertisementStore;

use crate::config::ExposureConfiguration;
use crate::error::SessionError;
use crate::query::QuerySession;
use crate::records::{ExposureRecord, ExposureSummary, round_to_minutes};
use crate::risk::risk_score;

/// Keys handed to the query session per batch.
const TEK_BATCH_SIZE: usize = 256;

/// No attenuation gating at query time; filtering happens at scoring.
const NO_GATING_THRESHOLD: u8 = 0xFF;

/// Pre-filter sizing: bits per stored row.
const PREFILTER_BITS_PER_ROW: u64 = 10;

/// Pre-filter hash count.
const PREFILTER_HASHES: usize = 3;

/// Smallest pre-filter backing buffer, bytes.
const PREFILTER_MIN_BYTES: usize = 1024;

/// Batched ingestion of TEK export files with summary emission.
///
/// Wraps a [`QuerySession`] configured for detection: no attenuation gate
/// at query time, caching enabled, and a pre-filter sized from the
/// store's row count. Errors from a file abort that file; the session
/// stays valid for further files.
pub struct DetectionSession {
    query: QuerySession,
}

impl DetectionSession {
    /// Opens a detection session over `store`.
    pub fn new(
        store: Arc<AdvertisementStore>,
        config: ExposureConfiguration,
    ) -> Result<Self, SessionError> {
        let rows = store.stored_count()?;
        let buffer_size =
            usize::try_from((rows * PREFILTER_BITS_PER_ROW).div_ceil(8)).unwrap_or(usize::MAX);
        let query = QuerySession::new(store, config, NO_GATING_THRESHOLD)?
            .with_prefilter(buffer_size.max(PREFILTER_MIN_BYTES), PREFILTER_HASHES)?
            .with_exposure_cache()?;
        Ok(Self { query })
    }

    /// Matches every key in one export file, in batches of 256.
    ///
    /// Returns the number of keys from this file that produced exposure
    /// records. The first read error aborts the file and surfaces; keys
    /// already processed stay cached.
    pub fn process_export(
        &mut self,
        reader: &ExportReader,
        now: i64,
    ) -> Result<u64, SessionError> {
        let mut batch: Vec<TemporaryExposureKey> = Vec::with_capacity(TEK_BATCH_SIZE);
        let mut matched = 0u64;
        for key in reader.keys() {
            batch.push(key?);
            if batch.len() == TEK_BATCH_SIZE {
                matched += self.query.match_count(&batch, now)?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            matched += self.query.match_count(&batch, now)?;
        }
        Ok(matched)
    }

    /// Keys that produced exposure records, across every processed file.
    #[must_use]
    pub fn matched_key_count(&self) -> u64 {
        self.query.matched_key_count()
    }

    /// Advertisements rejected or filtered across every processed file.
    #[must_use]
    pub fn dropped_advertisement_count(&self) -> u64 {
        self.query.dropped_advertisement_count()
    }

    /// Walks the cached exposure records and folds everything passing the
    /// risk gates into a summary.
    #[must_use]
    pub fn generate_summary(&self, now: i64) -> ExposureSummary {
        let mut summary = ExposureSummary {
            matched_key_count: self.query.matched_key_count(),
            ..ExposureSummary::default()
        };
        let Some(today) = DateTime::from_timestamp(now, 0).map(|dt| dt.date_naive()) else {
            return summary;
        };
        let config = self.query.config();

        let mut durations = [0u32; 3];
        let mut min_days: Option<i64> = None;
        for record in self.cached_records() {
            let days = (today - record.date).num_days();
            let score = risk_score(record, days, config);
            if !score.admitted(config) {
                continue;
            }
            summary.maximum_risk_score = summary.maximum_risk_score.max(score.clamped);
            summary.maximum_risk_score_full_range =
                summary.maximum_risk_score_full_range.max(score.full_range);
            summary.risk_score_sum_full_range += score.full_range;
            for (bin, slot) in durations.iter_mut().enumerate() {
                *slot += u32::from(record.attenuation_durations[bin]);
            }
            min_days = Some(min_days.map_or(days, |d| d.min(days)));
        }

        summary.days_since_last_exposure =
            u32::try_from(min_days.unwrap_or(0).max(0)).unwrap_or(u32::MAX);
        for (bin, slot) in summary.attenuation_durations.iter_mut().enumerate() {
            *slot = round_to_minutes(durations[bin]) as u16;
        }
        summary
    }

    /// The cached exposure records passing the risk gates, durations
    /// rounded the same way the summary rounds them.
    #[must_use]
    pub fn exposure_info(&self, now: i64) -> Vec<ExposureRecord> {
        let Some(today) = DateTime::from_timestamp(now, 0).map(|dt| dt.date_naive()) else {
            return Vec::new();
        };
        let config = self.query.config();
        self.cached_records()
            .iter()
            .filter(|record| {
                let days = (today - record.date).num_days();
                risk_score(record, days, config).admitted(config)
            })
            .map(ExposureRecord::rounded)
            .collect()
    }

    fn cached_records(&self) -> &[ExposureRecord] {
        self.query
            .exposure_cache()
            .map(|cache| cache.records())
            .unwrap_or(&[])
    }
}
