//! Query session: one batch of keys through the full match pipeline.

use std::sync::Arc;

use tracing::debug;

use encore_crypto::TemporaryExposureKey;
use encore_store::{AdvertisementStore, RpiFilter};

use crate::cache::ExposureCache;
use crate::config::ExposureConfiguration;
use crate::error::SessionError;
use crate::expand::RpiBuffer;
use crate::pipeline;
use crate::records::ExposureRecord;

/// Matches TEK batches against the advertisement store.
///
/// Owns the optional bloom pre-filter (installed into the store as the
/// inline filter for the session's lifetime and torn down on drop) and
/// the optional exposure-record cache. Single-threaded; one buffer
/// expansion and one store join per [`match_teks`](Self::match_teks)
/// call.
pub struct QuerySession {
    store: Arc<AdvertisementStore>,
    filter: Option<Arc<RpiFilter>>,
    attenuation_threshold: u8,
    config: ExposureConfiguration,
    cache: Option<ExposureCache>,
    matched_key_count: u64,
    possible_rpi_count: u64,
    dropped_advertisements: u64,
}

impl QuerySession {
    /// Creates a session over `store`.
    ///
    /// Matches whose attenuation reaches `attenuation_threshold` are
    /// rejected at query time; pass `0xFF` to disable gating.
    pub fn new(
        store: Arc<AdvertisementStore>,
        config: ExposureConfiguration,
        attenuation_threshold: u8,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self {
            store,
            filter: None,
            attenuation_threshold,
            config,
            cache: None,
            matched_key_count: 0,
            possible_rpi_count: 0,
            dropped_advertisements: 0,
        })
    }

    /// Builds a pre-filter over the store's current contents and installs
    /// it as the store's inline filter for this session's lifetime.
    pub fn with_prefilter(mut self, buffer_size: usize, k: usize) -> Result<Self, SessionError> {
        let filter = Arc::new(self.store.build_prefilter(buffer_size, k)?);
        self.store.set_inline_filter(Arc::clone(&filter));
        self.filter = Some(filter);
        Ok(self)
    }

    /// Enables the exposure-record cache, sized from the store's current
    /// row count.
    pub fn with_exposure_cache(mut self) -> Result<Self, SessionError> {
        let capacity = usize::try_from(self.store.stored_count()?).unwrap_or(usize::MAX);
        self.cache = Some(ExposureCache::new(capacity));
        Ok(self)
    }

    /// The session's scoring configuration.
    #[must_use]
    pub fn config(&self) -> &ExposureConfiguration {
        &self.config
    }

    /// Keys that produced at least one exposure record so far.
    #[must_use]
    pub fn matched_key_count(&self) -> u64 {
        self.matched_key_count
    }

    /// Valid buffer positions across all queries so far.
    #[must_use]
    pub fn possible_rpi_count(&self) -> u64 {
        self.possible_rpi_count
    }

    /// Advertisements rejected or filtered across all queries so far.
    #[must_use]
    pub fn dropped_advertisement_count(&self) -> u64 {
        self.dropped_advertisements
    }

    /// The exposure cache, when enabled.
    #[must_use]
    pub fn exposure_cache(&self) -> Option<&ExposureCache> {
        self.cache.as_ref()
    }

    /// Runs one key batch through expansion, the store join, and the
    /// post-processing pipeline.
    ///
    /// Returns the exposure records produced for this batch; records are
    /// additionally retained in the cache when it is enabled.
    pub fn match_teks(
        &mut self,
        teks: &[TemporaryExposureKey],
        now: i64,
    ) -> Result<Vec<ExposureRecord>, SessionError> {
        let buffer = RpiBuffer::expand(teks, self.filter.as_deref())?;
        self.possible_rpi_count += buffer.possible_rpi_count as u64;

        let mut matches =
            self.store
                .match_buffer(&buffer.rpis, &buffer.validity, buffer.possible_rpi_count)?;

        let mut dropped =
            pipeline::apply_rejections(&mut matches, &buffer, now, self.attenuation_threshold);
        let records =
            pipeline::build_exposure_records(&matches, &buffer, &self.config, &mut dropped);
        self.dropped_advertisements += dropped;
        self.matched_key_count += records.len() as u64;

        if let Some(cache) = self.cache.as_mut() {
            for record in &records {
                cache.push(record.clone());
            }
        }

        debug!(
            keys = buffer.teks.len(),
            raw_matches = matches.len(),
            records = records.len(),
            dropped,
            "key batch matched"
        );
        Ok(records)
    }

    /// [`match_teks`](Self::match_teks) returning only the number of keys
    /// that produced an exposure record.
    pub fn match_count(
        &mut self,
        teks: &[TemporaryExposureKey],
        now: i64,
    ) -> Result<u64, SessionError> {
        Ok(self.match_teks(teks, now)?.len() as u64)
    }
}

impl Drop for QuerySession {
    fn drop(&mut self) {
        if self.filter.is_some() {
            self.store.clear_inline_filter();
        }
    }
}
