//! Leak Event Analysis
//!
//! Extracts leak events from warehoused readings and populates the
//! leak_analysis schema with relational records.
//!
//! For each day in the analysis range:
//! 1. Load the warehoused flow readings
//! 2. Build the main-vs-branches balance series
//! 3. Detect mismatch and hidden-leak windows
//! 4. Persist events with phase-tagged samples (onset / active / peak)
//!
//! Usage:
//!   cargo run --bin analyze_leak_events
//!
//! Options:
//!   --days N       Analysis range, counting back from now (default: 30)
//!   --reanalyze    Clear existing events before analyzing
//!
//! Environment:
//!   DATABASE_URL - PostgreSQL connection string

use aquamon_service::analysis::leak_events::{analyze_window, load_config};
use aquamon_service::channels::ChannelRegistry;
use aquamon_service::config;
use chrono::{Duration, Utc};
use postgres::Client;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("💧 Leak Event Analysis");
    println!("======================\n");

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let days: i64 = args
        .iter()
        .position(|a| a == "--days")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);

    let reanalyze = args.contains(&"--reanalyze".to_string());

    // Connect to database with validation
    println!("📊 Connecting to database...");
    let mut client = aquamon_service::db::connect_and_verify(&["telemetry", "leak_analysis"])
        .unwrap_or_else(|e| {
            eprintln!("\n{}\n", e);
            eprintln!("Note: leak_analysis schema required. Run migration:");
            eprintln!("  psql -U aquamon_admin -d aquamon_db -f sql/003_leak_analysis.sql\n");
            std::process::exit(1);
        });
    println!("✓ Connected\n");

    // Load channel registry and balance tuning
    let meter_config = config::load_config();
    let max_gap_seconds = meter_config.balance.max_gap_seconds;
    let registry = ChannelRegistry::new(meter_config.channels);

    // Load analysis configuration
    println!("⚙️  Loading analysis configuration...");
    let analysis_config = load_config(&mut client)?;
    println!("✓ Configuration loaded:");
    println!("  - Mismatch threshold: {:.3} L/s", analysis_config.mismatch_threshold_lps);
    println!("  - Hidden-leak floor:  {:.3} L/s", analysis_config.hidden_leak_min_lps);
    println!(
        "  - Min event duration: {:.0} s\n",
        analysis_config.min_event_duration_seconds
    );

    // Clear existing analysis if reanalyzing
    if reanalyze {
        println!("🔄 Re-analysis mode: clearing existing events...");
        client.execute("DELETE FROM leak_analysis.event_samples", &[])?;
        client.execute("DELETE FROM leak_analysis.events", &[])?;
        println!("✓ Cleared\n");
    }

    // Analyze one day at a time so progress is visible and one torn day
    // cannot abort the whole run
    println!("🔍 Analyzing the last {} day(s)...\n", days);
    let now = Utc::now();
    let mut total_events = 0usize;
    let mut error_count = 0usize;

    for day_offset in (0..days).rev() {
        let window_end = now - Duration::days(day_offset);
        let window_start = window_end - Duration::days(1);
        println!("  {} …", window_start.format("%Y-%m-%d"));

        match analyze_window(
            &mut client,
            &registry,
            &analysis_config,
            max_gap_seconds,
            window_start,
            window_end,
        ) {
            Ok(count) => total_events += count,
            Err(e) => {
                eprintln!("  ✗ Error analyzing {}: {}", window_start.format("%Y-%m-%d"), e);
                error_count += 1;
            }
        }
    }

    // Rollup
    println!("\n📈 Event totals by kind:");
    match summarize_events(&mut client) {
        Ok(rows) if rows.is_empty() => println!("   (no events on record)"),
        Ok(rows) => {
            for (kind, count, lost_l) in rows {
                println!("   {:12} {:4} event(s), {:.1} L lost", kind, count, lost_l);
            }
        }
        Err(e) => eprintln!("   ✗ Error summarizing events: {}", e),
    }

    // Summary
    println!("\n{}", "=".repeat(50));
    println!("Summary:");
    println!("  Events stored: {}", total_events);
    println!("  Errors: {}", error_count);
    println!("{}", "=".repeat(50));

    if total_events > 0 {
        println!("\nQuery examples:");
        println!("  -- View all detected events");
        println!("  SELECT * FROM leak_analysis.events ORDER BY event_start DESC;");
        println!();
        println!("  -- Samples for a specific event");
        println!("  SELECT * FROM leak_analysis.event_samples WHERE event_id = 1;");
    }

    Ok(())
}

/// Aggregate event counts and lost volume by kind.
fn summarize_events(
    client: &mut Client,
) -> Result<Vec<(String, i64, f64)>, Box<dyn std::error::Error>> {
    let rows = client.query(
        "SELECT kind, COUNT(*), COALESCE(SUM(lost_volume_l), 0)
         FROM leak_analysis.events
         GROUP BY kind
         ORDER BY kind",
        &[],
    )?;

    let mut results = Vec::new();
    for row in rows {
        let kind: String = row.get(0);
        let count: i64 = row.get(1);
        let lost: rust_decimal::Decimal = row.get(2);
        results.push((kind, count, lost.to_string().parse().unwrap_or(0.0)));
    }

    Ok(results)
}
