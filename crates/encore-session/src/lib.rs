//! # encore-session
//!
//! The detection pipeline: diagnosed keys in, exposure records and a risk
//! summary out.
//!
//! A [`QuerySession`] expands a batch of TEKs into one flat RPI buffer,
//! joins it against the advertisement store, and post-processes the raw
//! matches (age and interval-consistency rejection, temporal merging,
//! plausibility filters, attenuation bucketing) into per-key
//! [`ExposureRecord`]s. A [`DetectionSession`] drives a query session over
//! whole export files, accumulates records in a bounded cache, and emits
//! an [`ExposureSummary`] with multiplicative risk scores.
//!
//! Sessions are single-threaded; the only shared resource is the store,
//! which serializes access through its own transaction discipline.

pub mod cache;
pub mod config;
pub mod detect;
pub mod error;
pub mod expand;
mod pipeline;
pub mod query;
pub mod records;
pub mod risk;

pub use cache::{DEFAULT_BATCH_SIZE, DEFAULT_CACHE_CAPACITY, ExposureCache};
pub use config::ExposureConfiguration;
pub use detect::DetectionSession;
pub use error::SessionError;
pub use expand::RpiBuffer;
pub use query::QuerySession;
pub use records::{ExposureRecord, ExposureSummary};
pub use risk::{RiskScore, risk_score};

/// Advertisements older than this are outside the retention window.
pub const RETENTION_SECONDS: i64 = 14 * 86_400;

/// Tolerated distance, in 10-minute intervals, between an observation's
/// ENIN and the interval a matched RPI was generated for (±2 hours).
pub const ENIN_TOLERANCE: i64 = 12;
