//! Bounded in-memory cache of exposure records.

use std::ops::Range;

use tracing::debug;

use crate::records::ExposureRecord;

/// Upper bound on cache capacity regardless of store size.
pub const DEFAULT_CACHE_CAPACITY: usize = 915_000;

/// Default enumeration batch size.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// Fixed-capacity buffer of exposure records.
///
/// Capacity is sized from the store's row count at session construction.
/// Once full, further pushes are dropped silently; running out of cache
/// space is not an error, it just truncates what summaries can see.
pub struct ExposureCache {
    records: Vec<ExposureRecord>,
    capacity: usize,
    dropped: u64,
}

impl ExposureCache {
    /// Creates a cache holding at most `capacity` records.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(DEFAULT_CACHE_CAPACITY);
        Self {
            records: Vec::new(),
            capacity,
            dropped: 0,
        }
    }

    /// Stores a record, dropping it silently at capacity.
    pub fn push(&mut self, record: ExposureRecord) {
        if self.records.len() < self.capacity {
            self.records.push(record);
        } else {
            self.dropped += 1;
            if self.dropped == 1 {
                debug!(capacity = self.capacity, "exposure cache full");
            }
        }
    }

    /// Number of cached records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records dropped after the cache filled.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// All cached records in insertion order.
    #[must_use]
    pub fn records(&self) -> &[ExposureRecord] {
        &self.records
    }

    /// Batched enumeration over a sub-range.
    ///
    /// The range is clipped to the cached extent; `batch_size` is clamped
    /// to at least 1.
    pub fn batches(
        &self,
        range: Range<usize>,
        batch_size: usize,
    ) -> impl Iterator<Item = &[ExposureRecord]> {
        let start = range.start.min(self.records.len());
        let end = range.end.clamp(start, self.records.len());
        self.records[start..end].chunks(batch_size.max(1))
    }
}
