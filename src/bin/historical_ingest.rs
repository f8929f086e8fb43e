//! Historical data ingestion for captured CSV logs.
//!
//! The capture rig produces one CSV per session (a day, a weekend, a
//! debugging run). This binary loads any number of them into the
//! warehouse: files are parsed in parallel on a thread pool, the merged
//! readings are sorted into one timeline, and warehousing runs through
//! the daemon's idempotent path so the consumption rollup stays correct.
//!
//! It maintains state in a file to track:
//! - Which log files have already been ingested
//! - Last successful update timestamp
//!
//! Usage:
//!   cargo run --bin historical_ingest -- capture1.csv capture2.csv
//!
//! Options:
//!   --force    Re-ingest files already recorded in the state file
//!
//! Environment:
//!   DATABASE_URL - PostgreSQL connection string

use aquamon_service::channels::ChannelRegistry;
use aquamon_service::daemon::Daemon;
use aquamon_service::ingest::csvlog;
use aquamon_service::model::FlowReading;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc;
use threadpool::ThreadPool;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const STATE_FILE: &str = "historical_ingest_state.json";

/// Parser threads; parsing is CPU-light, so a small pool is plenty.
const PARSE_WORKERS: usize = 4;

// ---------------------------------------------------------------------------
// State Management
// ---------------------------------------------------------------------------

/// Persistent state tracking historical data ingestion progress.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IngestState {
    /// ISO 8601 timestamp of last successful update.
    /// Example: "2026-02-19T06:00:00Z"
    last_update: Option<String>,

    /// Log files already ingested, by path as given on the command line.
    #[serde(default)]
    files_completed: Vec<String>,
}

impl IngestState {
    /// Load state from disk, creating default if missing.
    fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = PathBuf::from(STATE_FILE);

        if !path.exists() {
            println!("📋 No state file found, creating new state");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)?;
        let state: IngestState = serde_json::from_str(&contents)?;

        println!("📋 Loaded state:");
        println!("   Files completed: {}", state.files_completed.len());
        println!("   Last update: {:?}", state.last_update);

        Ok(state)
    }

    /// Save state to disk.
    fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(STATE_FILE, json)?;
        println!("💾 Saved state to {}", STATE_FILE);
        Ok(())
    }

    fn is_completed(&self, path: &str) -> bool {
        self.files_completed.iter().any(|p| p == path)
    }

    fn mark_completed(&mut self, path: &str) {
        if !self.is_completed(path) {
            self.files_completed.push(path.to_string());
        }
        self.last_update = Some(Utc::now().to_rfc3339());
    }
}

// ---------------------------------------------------------------------------
// Parallel parsing
// ---------------------------------------------------------------------------

/// Parse all files on a thread pool; results come back unordered.
fn parse_files(
    paths: &[String],
    registry: &ChannelRegistry,
) -> Vec<(String, Result<Vec<FlowReading>, String>)> {
    let pool = ThreadPool::new(PARSE_WORKERS.min(paths.len().max(1)));
    let (tx, rx) = mpsc::channel();

    for path in paths {
        let tx = tx.clone();
        let path = path.clone();
        let registry = registry.clone();
        pool.execute(move || {
            let result = csvlog::load_csv_file(&path, &registry).map_err(|e| e.to_string());
            // Receiver outlives the pool; a send failure means main died.
            let _ = tx.send((path, result));
        });
    }
    drop(tx);

    rx.iter().collect()
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("💧 Historical CSV Ingestion");
    println!("===========================\n");

    // Parse arguments
    let args: Vec<String> = std::env::args().skip(1).collect();
    let force = args.contains(&"--force".to_string());
    let paths: Vec<String> = args.into_iter().filter(|a| a != "--force").collect();

    if paths.is_empty() {
        eprintln!("Usage: historical_ingest [--force] FILE.csv [FILE.csv ...]");
        std::process::exit(1);
    }

    let mut state = IngestState::load()?;

    // Skip files we've already ingested unless forced
    let pending: Vec<String> = paths
        .iter()
        .filter(|p| {
            if !force && state.is_completed(p) {
                println!("   {} - already ingested (use --force to repeat)", p);
                false
            } else {
                true
            }
        })
        .cloned()
        .collect();

    if pending.is_empty() {
        println!("\nℹ️  Nothing to do.");
        return Ok(());
    }

    // Initialize the daemon path: database validation + registry
    println!("\n📊 Initializing warehouse connection...");
    let mut daemon = Daemon::new();
    daemon.initialize().map_err(|e| {
        eprintln!("\n❌ Initialization failed: {}\n", e);
        e
    })?;
    let registry = daemon
        .registry()
        .cloned()
        .ok_or("registry unavailable after initialization")?;
    println!("✓ Connected, {} channels\n", registry.len());

    // Parse all pending files in parallel
    println!("🧵 Parsing {} file(s) on {} workers...", pending.len(), PARSE_WORKERS);
    let parsed = parse_files(&pending, &registry);

    // Merge successful parses into one timeline
    let mut merged: Vec<FlowReading> = Vec::new();
    let mut failed = 0usize;
    let mut succeeded: Vec<String> = Vec::new();

    for (path, result) in parsed {
        match result {
            Ok(mut readings) => {
                println!("   ✓ {} - {} readings", path, readings.len());
                merged.append(&mut readings);
                succeeded.push(path);
            }
            Err(e) => {
                eprintln!("   ✗ {} - {}", path, e);
                failed += 1;
            }
        }
    }

    // Warehouse in timestamp order so per-channel volume integration sees
    // monotonically increasing deltas across file boundaries.
    merged.sort_by(|a, b| a.datetime.cmp(&b.datetime));

    println!("\n📥 Warehousing {} readings...", merged.len());
    let inserted = daemon.warehouse_readings(&merged)?;
    println!("   ✓ {} new ({} duplicates skipped)", inserted, merged.len() - inserted);

    for path in &succeeded {
        state.mark_completed(path);
    }
    state.save()?;

    // Summary
    println!("\n{}", "=".repeat(50));
    println!("Summary:");
    println!("  Files ingested: {}", succeeded.len());
    println!("  Files failed:   {}", failed);
    println!("  New readings:   {}", inserted);
    println!("{}", "=".repeat(50));

    if failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}
