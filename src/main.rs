//! Water Monitoring Service - Main Daemon
//!
//! A server-side daemon that continuously:
//! 1. Ingests the ESP32 main-meter serial feed and the multi-sensor CSV log
//! 2. Validates and curates readings in PostgreSQL
//! 3. Integrates per-channel volumes and maintains consumption rollups
//! 4. Watches the main-vs-branches flow balance for leak signatures
//! 5. Provides an HTTP endpoint for querying channel data and forecasts
//!
//! Usage:
//!   cargo run --release -- --serial /dev/ttyUSB0 --csv data.csv
//!   cargo run --release -- --csv data.csv --endpoint 8080
//!
//! Environment:
//!   DATABASE_URL - PostgreSQL connection string

use aquamon_service::daemon::Daemon;
use aquamon_service::endpoint;
use std::env;

fn main() {
    println!("💧 Water Monitoring Service");
    println!("===========================\n");

    // Parse command-line arguments
    let args: Vec<String> = env::args().collect();
    let mut endpoint_port: Option<u16> = None;
    let mut serial_path: Option<String> = None;
    let mut csv_path: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--endpoint" => {
                if i + 1 < args.len() {
                    endpoint_port = args[i + 1].parse().ok();
                    i += 2;
                } else {
                    eprintln!("Error: --endpoint requires a port number");
                    std::process::exit(1);
                }
            }
            "--serial" => {
                if i + 1 < args.len() {
                    serial_path = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    eprintln!("Error: --serial requires a device path");
                    std::process::exit(1);
                }
            }
            "--csv" => {
                if i + 1 < args.len() {
                    csv_path = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    eprintln!("Error: --csv requires a file path");
                    std::process::exit(1);
                }
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                eprintln!(
                    "Usage: {} [--serial DEVICE] [--csv FILE] [--endpoint PORT]",
                    args[0]
                );
                std::process::exit(1);
            }
        }
    }

    if serial_path.is_none() && csv_path.is_none() {
        eprintln!("Error: at least one source is required (--serial and/or --csv)");
        std::process::exit(1);
    }

    // Create daemon with default configuration
    let mut daemon = Daemon::new();

    // Initialize: validate database and load channel registry
    println!("📊 Initializing daemon...");
    if let Err(e) = daemon.initialize() {
        eprintln!("\n❌ Initialization failed: {}\n", e);
        eprintln!("Run setup validation: ./scripts/validate_db_setup.sh\n");
        std::process::exit(1);
    }
    println!("✓ Daemon initialized\n");

    // Attach sources
    if let Some(path) = &serial_path {
        match daemon.attach_serial(path) {
            Ok(()) => println!("🔌 Serial feed attached: {}", path),
            Err(e) => {
                eprintln!("❌ Failed to open serial port {}: {}", path, e);
                std::process::exit(1);
            }
        }
    }
    if let Some(path) = &csv_path {
        daemon.attach_csv(path);
        println!("📄 CSV log attached: {}", path);
    }
    println!();

    // Check for stale data and backfill from the CSV log if possible
    println!("📋 Checking data freshness...");
    let mut backfill_needed = false;

    // Collect channel ids first to avoid borrow checker issues
    let channel_ids: Vec<String> = daemon
        .registry()
        .map(|r| r.all_channel_ids().iter().map(|s| s.to_string()).collect())
        .unwrap_or_default();

    for channel_id in &channel_ids {
        match daemon.check_staleness(channel_id) {
            Ok(None) => {
                println!("   {} - No data found (needs backfill)", channel_id);
                backfill_needed = true;
            }
            Ok(Some(staleness)) => {
                let minutes = staleness.num_minutes();
                if daemon.needs_backfill(channel_id).unwrap_or(false) {
                    println!("   {} - Data is {} min old (stale)", channel_id, minutes);
                    backfill_needed = true;
                } else {
                    println!("   {} - Data is fresh ({} s old)", channel_id, staleness.num_seconds());
                }
            }
            Err(e) => {
                eprintln!("   {} - Error checking staleness: {}", channel_id, e);
            }
        }
    }

    // Run backfill from the CSV log when any channel lags behind it
    if backfill_needed {
        if let Some(path) = &csv_path {
            println!("\n📥 Backfilling from {}...", path);
            match daemon.backfill_from_csv(path) {
                Ok(count) => println!("   ✓ Inserted {} readings", count),
                Err(e) => eprintln!("   ✗ Backfill failed: {}", e),
            }
        } else {
            println!("\n   (no CSV log attached; history starts from live data)");
        }
        println!();
    }

    // Start HTTP endpoint if requested (in background thread)
    if let Some(port) = endpoint_port {
        println!("🚀 Starting HTTP endpoint server...");

        // The endpoint gets its own database connection and registry copy
        let registry = daemon.registry().cloned();
        let tariff = daemon.tariff_per_m3();
        match (aquamon_service::db::connect_with_validation(), registry) {
            (Ok(client), Some(registry)) => {
                // Spawn endpoint server in background thread
                std::thread::spawn(move || {
                    if let Err(e) = endpoint::start_endpoint_server(port, client, registry, tariff) {
                        eprintln!("❌ Endpoint server error: {}", e);
                    }
                });
                println!("   Endpoint running on http://0.0.0.0:{}\n", port);
            }
            (Err(e), _) => {
                eprintln!("❌ Failed to connect to database for endpoint: {}", e);
                eprintln!("   Continuing without HTTP endpoint\n");
            }
            (_, None) => {
                eprintln!("❌ Registry unavailable; continuing without HTTP endpoint\n");
            }
        }
    }

    // Run the main sampling loop
    println!("🔄 Starting continuous sampling loop...");
    println!(
        "   Monitoring {} channels",
        daemon.registry().map_or(0, |r| r.len())
    );
    println!("   Press Ctrl+C to stop\n");

    if let Err(e) = daemon.run() {
        eprintln!("\n❌ Daemon error: {}", e);
        std::process::exit(1);
    }
}
