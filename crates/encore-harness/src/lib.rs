//! Operator tooling for the encore detection core.
//!
//! Glue between files on disk and the library crates: JSONL advertisement
//! captures go into the store, export files go through a detection
//! session, and the result comes back as a serializable report.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use encore_export::ExportReader;
use encore_session::{DetectionSession, ExposureConfiguration, ExposureRecord, ExposureSummary};
use encore_store::{AdvertisementRecord, AdvertisementStore};

/// Errors surfaced by the harness commands.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {source}")]
    BadCaptureLine {
        line: usize,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] encore_store::StoreError),
    #[error(transparent)]
    Export(#[from] encore_export::ExportError),
    #[error(transparent)]
    Session(#[from] encore_session::SessionError),
}

/// Loads advertisement records from a JSONL capture into the store.
///
/// One [`AdvertisementRecord`] per line; blank lines are skipped. Returns
/// the number of rows ingested.
pub fn ingest_capture(
    store: &AdvertisementStore,
    input: impl BufRead,
) -> Result<u64, HarnessError> {
    let mut ingested = 0u64;
    for (i, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: AdvertisementRecord = serde_json::from_str(&line)
            .map_err(|source| HarnessError::BadCaptureLine { line: i + 1, source })?;
        store.insert(&record)?;
        ingested += 1;
    }
    Ok(ingested)
}

/// One export file a detection run could not process.
#[derive(Debug, Serialize)]
pub struct FileFailure {
    /// The export file that failed.
    pub path: PathBuf,
    /// Rendered error.
    pub error: String,
}

/// Everything a detection run produces, in one serializable bundle.
#[derive(Debug, Serialize)]
pub struct DetectionReport {
    /// Aggregate over all admitted exposure records.
    pub summary: ExposureSummary,
    /// The admitted records themselves, durations rounded.
    pub exposures: Vec<ExposureRecord>,
    /// Advertisements rejected or filtered during matching.
    pub dropped_advertisements: u64,
    /// Export files that aborted; keys they contributed before the error
    /// stay matched.
    pub failed_files: Vec<FileFailure>,
}

/// Runs a detection session over the given export files.
///
/// A read error aborts only the file it occurred in; the session stays
/// valid and the remaining files are still processed. Failed files are
/// listed in the report rather than failing the run.
pub fn run_detection<P: AsRef<Path>>(
    store: Arc<AdvertisementStore>,
    config: ExposureConfiguration,
    exports: &[P],
    now: i64,
) -> Result<DetectionReport, HarnessError> {
    let mut session = DetectionSession::new(store, config)?;
    let mut failed_files = Vec::new();
    for path in exports {
        let path = path.as_ref();
        let outcome = ExportReader::open(path)
            .map_err(HarnessError::from)
            .and_then(|reader| Ok(session.process_export(&reader, now)?));
        if let Err(err) = outcome {
            warn!(path = %path.display(), error = %err, "export file aborted");
            failed_files.push(FileFailure {
                path: path.to_path_buf(),
                error: err.to_string(),
            });
        }
    }
    Ok(DetectionReport {
        summary: session.generate_summary(now),
        exposures: session.exposure_info(now),
        dropped_advertisements: session.dropped_advertisement_count(),
        failed_files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_parses_jsonl_lines() {
        let store = AdvertisementStore::open_in_memory().unwrap();
        let capture = concat!(
            r#"{"rpi":[1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1],"encrypted_aem":[0,0,0,0],"#,
            r#""timestamp":1000,"scan_interval":4,"rssi":-60,"saturated":false,"counter":1}"#,
            "\n\n",
            r#"{"rpi":[2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2],"encrypted_aem":[0,0,0,0],"#,
            r#""timestamp":2000,"scan_interval":4,"rssi":-70,"saturated":false,"counter":1}"#,
            "\n",
        );
        let ingested = ingest_capture(&store, capture.as_bytes()).unwrap();
        assert_eq!(ingested, 2);
        assert_eq!(store.stored_count().unwrap(), 2);
    }

    #[test]
    fn ingest_reports_bad_line_number() {
        let store = AdvertisementStore::open_in_memory().unwrap();
        let err = ingest_capture(&store, "not json\n".as_bytes()).unwrap_err();
        assert!(matches!(err, HarnessError::BadCaptureLine { line: 1, .. }));
    }

    fn push_varint(out: &mut Vec<u8>, mut v: u64) {
        loop {
            let byte = (v & 0x7F) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                return;
            }
            out.push(byte | 0x80);
        }
    }

    fn push_bytes_field(out: &mut Vec<u8>, field: u32, bytes: &[u8]) {
        push_varint(out, (u64::from(field) << 3) | 2);
        push_varint(out, bytes.len() as u64);
        out.extend_from_slice(bytes);
    }

    #[test]
    fn detection_continues_past_broken_export() {
        const START: u32 = 2_649_600;
        let now = i64::from(START) * 600 + 600;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(AdvertisementStore::open(dir.path().join("adverts.db")).unwrap());

        // One stored observation of the key's first slot.
        let tek = [0x5Au8; 16];
        let schedule = encore_crypto::KeySchedule::derive(&tek).unwrap();
        let rpi = schedule.rpi_for(START);
        let encrypted_aem = schedule.encrypt_aem(&[0x40, 0x10, 0, 0], &rpi).unwrap();
        store
            .insert(&AdvertisementRecord {
                rpi,
                encrypted_aem,
                timestamp: now - 60,
                scan_interval: 4,
                rssi: -50,
                saturated: false,
                counter: 1,
            })
            .unwrap();

        // First file: a key frame claiming 100 bytes that are not there.
        let mut broken = encore_export::EXPORT_HEADER.to_vec();
        broken.extend_from_slice(&[0x3A, 0x64]);
        let broken_path = dir.path().join("broken.bin");
        std::fs::write(&broken_path, &broken).unwrap();

        // Second file: a well-formed export carrying the matching key.
        let mut sub = Vec::new();
        push_bytes_field(&mut sub, 1, &tek);
        push_varint(&mut sub, 3 << 3);
        push_varint(&mut sub, u64::from(START));
        let mut good = encore_export::EXPORT_HEADER.to_vec();
        push_bytes_field(&mut good, 7, &sub);
        let good_path = dir.path().join("good.bin");
        std::fs::write(&good_path, &good).unwrap();

        let report = run_detection(
            store,
            ExposureConfiguration::default(),
            &[&broken_path, &good_path],
            now,
        )
        .unwrap();

        // The broken file aborted alone; the run went on to the good one.
        assert_eq!(report.failed_files.len(), 1);
        assert!(report.failed_files[0].path.ends_with("broken.bin"));
        assert_eq!(report.summary.matched_key_count, 1);
        assert_eq!(report.exposures.len(), 1);
    }
}
