//! SQLite-backed advertisement store.
//!
//! One table, `advertisements`, keyed by `(rpi, timestamp)` with a
//! secondary index on `timestamp` for the daily purge. All read operations
//! run under an exclusive transaction so the join and the row-count
//! refresh see one stable snapshot; writers (the external BLE scanner and
//! the purge job) go through the same connection lock.
//!
//! The match path is the buffer join: an equi-join between the stored
//! table and the valid positions of a caller-owned RPI buffer, realized as
//! one index probe per valid position in ascending position order. The
//! borrowed buffers are only touched for the duration of the call.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, TransactionBehavior, params};
use tracing::{debug, warn};

use encore_crypto::{AEM_LEN, RPI_LEN};

use crate::bloom::RpiFilter;
use crate::error::StoreError;
use crate::record::{AdvertisementRecord, MatchedAdvertisement};

/// On-disk file name of the advertisement database.
pub const DB_FILE_NAME: &str = "en_advertisements.db";

/// Positions per TEK in a query's RPI buffer (one full rolling window).
const SLOTS_PER_KEY: usize = 144;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS advertisements (
    rpi           BLOB    NOT NULL,
    encrypted_aem BLOB    NOT NULL,
    timestamp     INTEGER NOT NULL,
    scan_interval INTEGER NOT NULL,
    rssi          INTEGER NOT NULL,
    saturated     BOOLEAN NOT NULL,
    counter       INTEGER NOT NULL,
    PRIMARY KEY (rpi, timestamp)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_advertisements_timestamp
    ON advertisements (timestamp);
";

struct Inner {
    conn: Connection,
    /// Cached row count; `None` after any mutation or a match overflow.
    cached_count: Option<u64>,
}

/// Handle to the persistent advertisement table.
///
/// The connection is serialized behind a mutex; concurrent sessions are
/// only coordinated through this lock plus SQLite's own transaction
/// discipline. A query session may install its bloom filter as the
/// "inline filter" for its lifetime; the store then skips probes the
/// filter rejects.
pub struct AdvertisementStore {
    inner: Mutex<Inner>,
    inline_filter: RwLock<Option<Arc<RpiFilter>>>,
}

impl AdvertisementStore {
    /// Opens (creating if necessary) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens a private in-memory store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                cached_count: None,
            }),
            inline_filter: RwLock::new(None),
        })
    }

    /// Installs a session's bloom filter for the session's lifetime.
    pub fn set_inline_filter(&self, filter: Arc<RpiFilter>) {
        *self.inline_filter.write() = Some(filter);
    }

    /// Tears the inline filter down again.
    pub fn clear_inline_filter(&self) {
        *self.inline_filter.write() = None;
    }

    /// Upserts one observation.
    ///
    /// A colliding `(rpi, timestamp)` folds into the stored row: counters
    /// add (capped at 255) and the stronger reading (smaller RSSI wins the
    /// tie toward caution) is kept.
    pub fn insert(&self, record: &AdvertisementRecord) -> Result<(), StoreError> {
        if record.counter == 0 {
            return Err(StoreError::InvalidArgument("counter must be >= 1"));
        }
        let mut inner = self.inner.lock();
        inner.conn.execute(
            "INSERT INTO advertisements
                 (rpi, encrypted_aem, timestamp, scan_interval, rssi, saturated, counter)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (rpi, timestamp) DO UPDATE SET
                 counter   = MIN(counter + excluded.counter, 255),
                 saturated = CASE WHEN excluded.rssi < rssi
                                  THEN excluded.saturated ELSE saturated END,
                 rssi      = MIN(rssi, excluded.rssi)",
            params![
                &record.rpi[..],
                &record.encrypted_aem[..],
                record.timestamp,
                record.scan_interval,
                record.rssi,
                record.saturated,
                record.counter,
            ],
        )?;
        inner.cached_count = None;
        Ok(())
    }

    /// Deletes rows older than `cutoff_ts`, returning how many went.
    ///
    /// The retention job calls this daily with `now - 14 days`.
    pub fn purge_older_than(&self, cutoff_ts: i64) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        let deleted = inner.conn.execute(
            "DELETE FROM advertisements WHERE timestamp < ?1",
            params![cutoff_ts],
        )?;
        inner.cached_count = None;
        Ok(deleted as u64)
    }

    /// Number of stored rows, served from cache when valid.
    pub fn stored_count(&self) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        if let Some(count) = inner.cached_count {
            return Ok(count);
        }
        let count: u64 =
            inner
                .conn
                .query_row("SELECT COUNT(*) FROM advertisements", [], |row| row.get(0))?;
        inner.cached_count = Some(count);
        Ok(count)
    }

    /// Builds a bloom filter over every stored RPI.
    ///
    /// Enumeration runs under an exclusive read transaction so the filter
    /// is consistent with a single snapshot of the table.
    pub fn build_prefilter(&self, buffer_size: usize, k: usize) -> Result<RpiFilter, StoreError> {
        let mut filter = RpiFilter::new(buffer_size, k);
        let mut inner = self.inner.lock();
        let tx = inner
            .conn
            .transaction_with_behavior(TransactionBehavior::Exclusive)?;
        {
            let mut stmt = tx.prepare("SELECT rpi FROM advertisements")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let blob: Vec<u8> = row.get(0)?;
                let rpi: [u8; RPI_LEN] = blob.try_into().map_err(|_| StoreError::Corrupt)?;
                filter.insert(&rpi);
            }
        }
        tx.commit()?;
        Ok(filter)
    }

    /// Joins the stored table against a query's RPI buffer.
    ///
    /// `rpi_buffer` holds `validity.len()` contiguous 16-byte identifiers;
    /// position `i` participates in the join only when `validity[i]` is
    /// true. Every stored row whose RPI equals a participating position is
    /// returned, annotated with `daily_key_index = i / 144` and
    /// `rpi_index = i mod 144` for the *first* (smallest) matching
    /// position. Positions are probed in ascending order; rows for one RPI
    /// come back in timestamp order.
    ///
    /// The result is bounded by `stored_count()` at entry. On overflow the
    /// excess is dropped, the cached count is invalidated, and the partial
    /// result is returned.
    pub fn match_buffer(
        &self,
        rpi_buffer: &[u8],
        validity: &[bool],
        valid_count: usize,
    ) -> Result<Vec<MatchedAdvertisement>, StoreError> {
        if rpi_buffer.len() != validity.len() * RPI_LEN {
            return Err(StoreError::InvalidArgument(
                "rpi buffer length must be 16 x validity length",
            ));
        }
        if valid_count == 0 {
            return Ok(Vec::new());
        }

        let filter_guard = self.inline_filter.read();
        let inline_filter = filter_guard.as_deref();

        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let tx = inner
            .conn
            .transaction_with_behavior(TransactionBehavior::Exclusive)?;

        let bound: u64 = match inner.cached_count {
            Some(count) => count,
            None => {
                let count =
                    tx.query_row("SELECT COUNT(*) FROM advertisements", [], |row| row.get(0))?;
                inner.cached_count = Some(count);
                count
            }
        };

        let mut matches: Vec<MatchedAdvertisement> = Vec::new();
        let mut probed: HashSet<[u8; RPI_LEN]> = HashSet::with_capacity(valid_count);
        let mut overflowed = false;
        {
            let mut stmt = tx.prepare(
                "SELECT encrypted_aem, timestamp, scan_interval, rssi, saturated, counter
                 FROM advertisements WHERE rpi = ?1 ORDER BY timestamp",
            )?;

            'positions: for (i, chunk) in rpi_buffer.chunks_exact(RPI_LEN).enumerate() {
                if !validity[i] {
                    continue;
                }
                let Ok(rpi) = <[u8; RPI_LEN]>::try_from(chunk) else {
                    continue;
                };
                if let Some(filter) = inline_filter {
                    if !filter.maybe_present(&rpi) {
                        continue;
                    }
                }
                // A duplicate RPI later in the buffer annotates with the
                // first position encountered.
                if !probed.insert(rpi) {
                    continue;
                }

                let mut rows = stmt.query(params![&rpi[..]])?;
                while let Some(row) = rows.next()? {
                    if matches.len() as u64 >= bound {
                        overflowed = true;
                        break 'positions;
                    }
                    let aem_blob: Vec<u8> = row.get(0)?;
                    let encrypted_aem: [u8; AEM_LEN] =
                        aem_blob.try_into().map_err(|_| StoreError::Corrupt)?;
                    let scan_interval = row
                        .get::<_, i64>(2)?
                        .try_into()
                        .map_err(|_| StoreError::Corrupt)?;
                    let counter = row
                        .get::<_, i64>(5)?
                        .try_into()
                        .map_err(|_| StoreError::Corrupt)?;
                    matches.push(MatchedAdvertisement {
                        advertisement: AdvertisementRecord {
                            rpi,
                            encrypted_aem,
                            timestamp: row.get(1)?,
                            scan_interval,
                            rssi: row.get(3)?,
                            saturated: row.get(4)?,
                            counter,
                        },
                        daily_key_index: (i / SLOTS_PER_KEY) as u32,
                        rpi_index: (i % SLOTS_PER_KEY) as u32,
                    });
                }
            }
        }
        tx.commit()?;

        if overflowed {
            // The bound came from a stale cache; force a refresh next time
            // and hand back what fit.
            inner.cached_count = None;
            warn!(
                bound,
                returned = matches.len(),
                "match result exceeded cached row count; excess dropped"
            );
        }
        debug!(
            valid_count,
            matched = matches.len(),
            "advertisement buffer join complete"
        );
        Ok(matches)
    }
}
