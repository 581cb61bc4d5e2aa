//! CLI entrypoint for the encore detection core.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};

use encore_harness::{HarnessError, ingest_capture, run_detection};
use encore_session::ExposureConfiguration;
use encore_store::AdvertisementStore;

/// On-device Exposure Notification detection tooling.
#[derive(Debug, Parser)]
#[command(name = "encore")]
#[command(about = "Exposure Notification detection core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load a JSONL advertisement capture into the store.
    Ingest {
        /// Path to the advertisement database.
        #[arg(long)]
        db: PathBuf,
        /// JSONL capture file, one advertisement record per line.
        input: PathBuf,
    },
    /// Run a detection session over TEK export files.
    Detect {
        /// Path to the advertisement database.
        #[arg(long)]
        db: PathBuf,
        /// Exposure configuration JSON (defaults when omitted).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override "now" as Unix seconds (defaults to wall clock).
        #[arg(long)]
        now: Option<i64>,
        /// Export files to process, in order.
        exports: Vec<PathBuf>,
    },
    /// Print the stored advertisement count.
    Stats {
        /// Path to the advertisement database.
        #[arg(long)]
        db: PathBuf,
    },
}

fn wall_clock() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn run(cli: Cli) -> Result<(), HarnessError> {
    match cli.command {
        Command::Ingest { db, input } => {
            let store = AdvertisementStore::open(db)?;
            let reader = BufReader::new(File::open(input)?);
            let ingested = ingest_capture(&store, reader)?;
            println!("{ingested} advertisements ingested");
        }
        Command::Detect {
            db,
            config,
            now,
            exports,
        } => {
            let store = Arc::new(AdvertisementStore::open(db)?);
            let config: ExposureConfiguration = match config {
                Some(path) => serde_json::from_reader(BufReader::new(File::open(path)?))?,
                None => ExposureConfiguration::default(),
            };
            let now = now.unwrap_or_else(wall_clock);
            let report = run_detection(store, config, &exports, now)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Stats { db } => {
            let store = AdvertisementStore::open(db)?;
            println!("{} advertisements stored", store.stored_count()?);
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
