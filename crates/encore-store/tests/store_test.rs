//! Integration tests: advertisement store buffer join.
//!
//! Run: cargo test -p encore-store --test store_test

use encore_store::{AdvertisementRecord, AdvertisementStore, RpiFilter};
use std::sync::Arc;

fn rpi(seed: u8) -> [u8; 16] {
    let mut out = [seed; 16];
    out[0] = seed.wrapping_add(1);
    out
}

fn record(rpi: [u8; 16], timestamp: i64) -> AdvertisementRecord {
    AdvertisementRecord {
        rpi,
        encrypted_aem: [0xAA, 0xBB, 0xCC, 0xDD],
        timestamp,
        scan_interval: 4,
        rssi: -60,
        saturated: false,
        counter: 1,
    }
}

/// Builds a buffer holding the given RPIs at consecutive positions,
/// everything valid.
fn buffer(rpis: &[[u8; 16]]) -> (Vec<u8>, Vec<bool>) {
    let mut buf = Vec::with_capacity(rpis.len() * 16);
    for r in rpis {
        buf.extend_from_slice(r);
    }
    (buf, vec![true; rpis.len()])
}

// ---------------------------------------------------------------------------
// Match completeness and annotation
// ---------------------------------------------------------------------------

#[test]
fn match_returns_stored_rows_with_positions() {
    let store = AdvertisementStore::open_in_memory().unwrap();
    store.insert(&record(rpi(7), 1000)).unwrap();
    store.insert(&record(rpi(9), 2000)).unwrap();

    // 150 positions: rpi(7) at slot 3, rpi(9) at slot 145 (= key 1, slot 1).
    let mut rpis = vec![[0u8; 16]; 150];
    rpis[3] = rpi(7);
    rpis[145] = rpi(9);
    let (buf, validity) = buffer(&rpis);

    let matches = store.match_buffer(&buf, &validity, 150).unwrap();
    assert_eq!(matches.len(), 2);

    assert_eq!(matches[0].advertisement.rpi, rpi(7));
    assert_eq!(matches[0].daily_key_index, 0);
    assert_eq!(matches[0].rpi_index, 3);

    assert_eq!(matches[1].advertisement.rpi, rpi(9));
    assert_eq!(matches[1].daily_key_index, 1);
    assert_eq!(matches[1].rpi_index, 1);
}

#[test]
fn invalid_positions_do_not_match() {
    let store = AdvertisementStore::open_in_memory().unwrap();
    store.insert(&record(rpi(7), 1000)).unwrap();

    let (buf, mut validity) = buffer(&[rpi(7)]);
    validity[0] = false;
    let matches = store.match_buffer(&buf, &validity, 0).unwrap();
    assert!(matches.is_empty());
}

#[test]
fn duplicate_buffer_rpi_annotates_first_position() {
    let store = AdvertisementStore::open_in_memory().unwrap();
    store.insert(&record(rpi(7), 1000)).unwrap();

    let (buf, validity) = buffer(&[rpi(1), rpi(7), rpi(7)]);
    let matches = store.match_buffer(&buf, &validity, 3).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].rpi_index, 1);
}

#[test]
fn rows_for_one_rpi_come_back_in_timestamp_order() {
    let store = AdvertisementStore::open_in_memory().unwrap();
    for ts in [3000i64, 1000, 2000] {
        store.insert(&record(rpi(7), ts)).unwrap();
    }
    let (buf, validity) = buffer(&[rpi(7)]);
    let matches = store.match_buffer(&buf, &validity, 1).unwrap();
    let timestamps: Vec<i64> = matches
        .iter()
        .map(|m| m.advertisement.timestamp)
        .collect();
    assert_eq!(timestamps, vec![1000, 2000, 3000]);
}

#[test]
fn mismatched_buffer_lengths_rejected() {
    let store = AdvertisementStore::open_in_memory().unwrap();
    let err = store.match_buffer(&[0u8; 15], &[true], 1).unwrap_err();
    assert!(matches!(err, encore_store::StoreError::InvalidArgument(_)));
}

// ---------------------------------------------------------------------------
// Row count cache and overflow bound
// ---------------------------------------------------------------------------

#[test]
fn stored_count_tracks_mutations() {
    let store = AdvertisementStore::open_in_memory().unwrap();
    assert_eq!(store.stored_count().unwrap(), 0);
    store.insert(&record(rpi(1), 100)).unwrap();
    store.insert(&record(rpi(2), 200)).unwrap();
    assert_eq!(store.stored_count().unwrap(), 2);
    store.purge_older_than(150).unwrap();
    assert_eq!(store.stored_count().unwrap(), 1);
}

#[test]
fn upsert_folds_counters_and_keeps_stronger_reading() {
    let store = AdvertisementStore::open_in_memory().unwrap();
    let mut a = record(rpi(7), 1000);
    a.rssi = -60;
    store.insert(&a).unwrap();
    let mut b = record(rpi(7), 1000);
    b.rssi = -70;
    b.counter = 2;
    store.insert(&b).unwrap();

    assert_eq!(store.stored_count().unwrap(), 1);
    let (buf, validity) = buffer(&[rpi(7)]);
    let matches = store.match_buffer(&buf, &validity, 1).unwrap();
    assert_eq!(matches[0].advertisement.counter, 3);
    assert_eq!(matches[0].advertisement.rssi, -70);
}

#[test]
fn stale_count_bounds_match_and_invalidates_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(encore_store::DB_FILE_NAME);
    let store_a = AdvertisementStore::open(&path).unwrap();
    let store_b = AdvertisementStore::open(&path).unwrap();

    store_a.insert(&record(rpi(1), 1000)).unwrap();
    // Prime this handle's count cache at one row.
    assert_eq!(store_a.stored_count().unwrap(), 1);

    // Rows arriving through another connection leave that cache stale.
    store_b.insert(&record(rpi(2), 2000)).unwrap();
    store_b.insert(&record(rpi(3), 3000)).unwrap();

    let (buf, validity) = buffer(&[rpi(1), rpi(2), rpi(3)]);
    let matches = store_a.match_buffer(&buf, &validity, 3).unwrap();
    // The result is truncated at the stale bound; the rest is dropped.
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].advertisement.rpi, rpi(1));

    // The overflow invalidated the cache, so the count now refreshes.
    assert_eq!(store_a.stored_count().unwrap(), 3);
    // With a fresh bound the same query returns everything.
    let matches = store_a.match_buffer(&buf, &validity, 3).unwrap();
    assert_eq!(matches.len(), 3);
}

#[test]
fn zero_counter_insert_rejected() {
    let store = AdvertisementStore::open_in_memory().unwrap();
    let mut bad = record(rpi(7), 1000);
    bad.counter = 0;
    assert!(store.insert(&bad).is_err());
}

// ---------------------------------------------------------------------------
// Pre-filter
// ---------------------------------------------------------------------------

#[test]
fn prefilter_covers_every_stored_rpi() {
    let store = AdvertisementStore::open_in_memory().unwrap();
    let rpis: Vec<[u8; 16]> = (0..50).map(|i| rpi(i as u8)).collect();
    for (i, r) in rpis.iter().enumerate() {
        store.insert(&record(*r, 1000 + i as i64)).unwrap();
    }
    let filter = store.build_prefilter(4096, 3).unwrap();
    for r in &rpis {
        assert!(filter.maybe_present(r));
    }
}

#[test]
fn inline_filter_suppresses_probes_it_rejects() {
    let store = AdvertisementStore::open_in_memory().unwrap();
    store.insert(&record(rpi(7), 1000)).unwrap();

    // An empty filter rejects everything, so even a stored RPI cannot match
    // while it is installed.
    store.set_inline_filter(Arc::new(RpiFilter::new(1024, 3)));
    let (buf, validity) = buffer(&[rpi(7)]);
    assert!(store.match_buffer(&buf, &validity, 1).unwrap().is_empty());

    store.clear_inline_filter();
    assert_eq!(store.match_buffer(&buf, &validity, 1).unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// On-disk round trip
// ---------------------------------------------------------------------------

#[test]
fn survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(encore_store::DB_FILE_NAME);
    {
        let store = AdvertisementStore::open(&path).unwrap();
        store.insert(&record(rpi(7), 1000)).unwrap();
    }
    let store = AdvertisementStore::open(&path).unwrap();
    assert_eq!(store.stored_count().unwrap(), 1);
    let (buf, validity) = buffer(&[rpi(7)]);
    assert_eq!(store.match_buffer(&buf, &validity, 1).unwrap().len(), 1);
}
