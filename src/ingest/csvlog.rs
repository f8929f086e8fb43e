/// Multi-channel CSV log parsing.
///
/// The capture script logs one row per second with the main meter and the
/// branch sensors side by side:
///
///   Timestamp,Pulsos,Vazão (L/min),S1 – Vazão (L/s),S2 – Vazão (L/s),S3- Vazão (L/s),S4 – Vazão (L/s)
///
/// Header spelling is not stable across capture runs (note the dash glued
/// to "S3"), so columns are classified structurally: the timestamp and
/// pulse columns by exact name, the main flow column by its "(L/min)" unit
/// marker, and branch columns by their leading sensor id matched against
/// the registry. Unknown columns are ignored rather than rejected.
///
/// The same parser serves the daemon's live tail (the logger re-writes the
/// file continuously) and the historical backfill binary; warehousing is
/// idempotent, so re-parsing overlapping rows is harmless.

use std::fs::File;
use std::io::Read;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::channels::ChannelRegistry;
use crate::model::{lpm_to_lps, FlowReading, IngestError, METRIC_FLOW, METRIC_PULSES};

const TIMESTAMP_HEADER: &str = "Timestamp";
const PULSES_HEADER: &str = "Pulsos";
const MAIN_FLOW_MARKER: &str = "(L/min)";

// ---------------------------------------------------------------------------
// Header classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum ColumnRole {
    Timestamp,
    Pulses,
    MainFlow,
    Branch(String),
    Ignored,
}

fn classify_header(header: &str, registry: &ChannelRegistry) -> ColumnRole {
    let h = header.trim();
    if h == TIMESTAMP_HEADER {
        return ColumnRole::Timestamp;
    }
    if h == PULSES_HEADER {
        return ColumnRole::Pulses;
    }
    if h.contains(MAIN_FLOW_MARKER) {
        return ColumnRole::MainFlow;
    }

    // Branch headers start with the sensor id ("S1 – Vazão (L/s)"); the id
    // is the leading alphanumeric run, lowercased to match the registry.
    let prefix: String = h
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();

    match registry.find(&prefix) {
        Some(channel) if !channel.is_main() => ColumnRole::Branch(prefix),
        _ => ColumnRole::Ignored,
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parses a logged timestamp. The capture script writes local wall-clock
/// `YYYY-MM-DD HH:MM:SS`; RFC 3339 is accepted for re-ingesting exported
/// data.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|n| n.and_utc())
}

/// Parses a CSV log into a flat list of `FlowReading`s, one per channel
/// per row.
///
/// Rows with an unparseable timestamp are skipped (the capture script
/// occasionally writes a torn row when interrupted). Within a valid row,
/// a blank or garbled flow cell reads as 0.0 — the logger writes empty
/// cells for sensors that missed a poll, and treating them as zero is
/// what the balance detector expects. Values the sensor cannot physically
/// produce (negative, or above the channel's ceiling) are dropped.
///
/// # Errors
/// - `IngestError::ParseError` — unreadable header row, or no timestamp
///   column.
/// - `IngestError::NoDataAvailable` — headers parsed but no row yielded a
///   reading.
pub fn parse_csv_log(
    input: impl Read,
    registry: &ChannelRegistry,
) -> Result<Vec<FlowReading>, IngestError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input);

    let headers = rdr.headers()?.clone();
    let roles: Vec<ColumnRole> = headers
        .iter()
        .map(|h| classify_header(h, registry))
        .collect();

    if !roles.contains(&ColumnRole::Timestamp) {
        return Err(IngestError::ParseError(format!(
            "no '{}' column in header: {:?}",
            TIMESTAMP_HEADER, headers
        )));
    }

    let main = registry.main();
    let mut readings = Vec::new();

    for record in rdr.records() {
        let record = record?;

        // Locate and parse the timestamp first; without it the row is useless.
        let timestamp = roles
            .iter()
            .zip(record.iter())
            .find(|(role, _)| **role == ColumnRole::Timestamp)
            .and_then(|(_, raw)| parse_timestamp(raw));

        let Some(timestamp) = timestamp else {
            continue;
        };
        let datetime = timestamp.to_rfc3339();

        for (role, raw) in roles.iter().zip(record.iter()) {
            match role {
                ColumnRole::Timestamp | ColumnRole::Ignored => {}
                ColumnRole::Pulses => {
                    if let Ok(pulses) = raw.parse::<i64>() {
                        if pulses >= 0 {
                            readings.push(FlowReading {
                                channel_id: main.channel_id.clone(),
                                channel_label: main.label.clone(),
                                metric_code: METRIC_PULSES.to_string(),
                                unit: "pulses".to_string(),
                                value: pulses as f64,
                                datetime: datetime.clone(),
                                quality: "B".to_string(),
                            });
                        }
                    }
                }
                ColumnRole::MainFlow => {
                    let lpm = raw.parse::<f64>().unwrap_or(0.0);
                    let lps = lpm_to_lps(lpm);
                    if (0.0..=main.max_plausible_lps).contains(&lps) {
                        readings.push(FlowReading {
                            channel_id: main.channel_id.clone(),
                            channel_label: main.label.clone(),
                            metric_code: METRIC_FLOW.to_string(),
                            unit: "L/s".to_string(),
                            value: lps,
                            datetime: datetime.clone(),
                            quality: "B".to_string(),
                        });
                    }
                }
                ColumnRole::Branch(channel_id) => {
                    // Registry membership was established during header
                    // classification.
                    let channel = registry.find(channel_id).unwrap();
                    let lps = raw.parse::<f64>().unwrap_or(0.0);
                    if (0.0..=channel.max_plausible_lps).contains(&lps) {
                        readings.push(FlowReading {
                            channel_id: channel.channel_id.clone(),
                            channel_label: channel.label.clone(),
                            metric_code: METRIC_FLOW.to_string(),
                            unit: "L/s".to_string(),
                            value: lps,
                            datetime: datetime.clone(),
                            quality: "B".to_string(),
                        });
                    }
                }
            }
        }
    }

    if readings.is_empty() {
        return Err(IngestError::NoDataAvailable(
            "CSV log contained no parseable rows".to_string(),
        ));
    }

    Ok(readings)
}

/// Opens and parses a CSV log file from disk.
pub fn load_csv_file(
    path: &str,
    registry: &ChannelRegistry,
) -> Result<Vec<FlowReading>, IngestError> {
    let file = File::open(path)?;
    parse_csv_log(file, registry)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fixtures::*;

    fn registry() -> ChannelRegistry {
        ChannelRegistry::load()
    }

    #[test]
    fn test_parse_normal_log_produces_all_channels() {
        let readings = parse_csv_log(fixture_csv_log().as_bytes(), &registry())
            .expect("fixture should parse");

        let channels: std::collections::HashSet<_> =
            readings.iter().map(|r| r.channel_id.as_str()).collect();
        for id in ["main", "s1", "s2", "s3", "s4"] {
            assert!(channels.contains(id), "missing channel '{}'", id);
        }
    }

    #[test]
    fn test_main_flow_converted_to_lps() {
        let readings = parse_csv_log(fixture_csv_log().as_bytes(), &registry())
            .expect("fixture should parse");

        // First row logs 12.0 L/min on the main meter -> 0.2 L/s.
        let main_flow = readings
            .iter()
            .find(|r| r.channel_id == "main" && r.metric_code == METRIC_FLOW)
            .expect("main flow reading");
        assert!((main_flow.value - 0.2).abs() < 1e-9);
        assert_eq!(main_flow.unit, "L/s");
        assert_eq!(main_flow.quality, "B");
    }

    #[test]
    fn test_pulses_routed_to_main_channel() {
        let readings = parse_csv_log(fixture_csv_log().as_bytes(), &registry())
            .expect("fixture should parse");

        let pulses: Vec<_> = readings
            .iter()
            .filter(|r| r.metric_code == METRIC_PULSES)
            .collect();
        assert!(!pulses.is_empty());
        assert!(pulses.iter().all(|r| r.channel_id == "main"));
    }

    #[test]
    fn test_inconsistent_branch_headers_still_match() {
        // The fixture reproduces the "S3- Vazão (L/s)" spelling (no space
        // before the dash); s3 must still be recognized.
        let readings = parse_csv_log(fixture_csv_log().as_bytes(), &registry())
            .expect("fixture should parse");
        assert!(readings.iter().any(|r| r.channel_id == "s3"));
    }

    #[test]
    fn test_blank_cells_read_as_zero() {
        let readings = parse_csv_log(fixture_csv_sparse_log().as_bytes(), &registry())
            .expect("sparse fixture should parse");

        // The sparse fixture leaves s2 blank in every row.
        let s2: Vec<_> = readings.iter().filter(|r| r.channel_id == "s2").collect();
        assert!(!s2.is_empty(), "blank cells should still produce readings");
        assert!(s2.iter().all(|r| r.value == 0.0));
    }

    #[test]
    fn test_torn_rows_are_skipped() {
        let readings = parse_csv_log(fixture_csv_sparse_log().as_bytes(), &registry())
            .expect("sparse fixture should parse");

        // Fixture has 3 rows, one with a torn timestamp: two survive.
        let timestamps: std::collections::HashSet<_> =
            readings.iter().map(|r| r.datetime.as_str()).collect();
        assert_eq!(timestamps.len(), 2);
    }

    #[test]
    fn test_implausible_values_are_dropped() {
        let readings = parse_csv_log(fixture_csv_sparse_log().as_bytes(), &registry())
            .expect("sparse fixture should parse");

        // The fixture logs 99.0 L/s on s4 (physically impossible) in one
        // row; that cell must not become a reading.
        assert!(
            readings
                .iter()
                .filter(|r| r.channel_id == "s4")
                .all(|r| r.value <= 0.5),
            "implausible s4 value should have been dropped"
        );
    }

    #[test]
    fn test_missing_timestamp_column_is_an_error() {
        let doc = "Pulsos,Vazão (L/min)\n42,1.23\n";
        let result = parse_csv_log(doc.as_bytes(), &registry());
        assert!(matches!(result, Err(IngestError::ParseError(_))));
    }

    #[test]
    fn test_header_only_log_is_no_data() {
        let doc = "Timestamp,Pulsos,Vazão (L/min)\n";
        let result = parse_csv_log(doc.as_bytes(), &registry());
        assert!(matches!(result, Err(IngestError::NoDataAvailable(_))));
    }

    #[test]
    fn test_parse_timestamp_accepts_both_formats() {
        assert!(parse_timestamp("2025-11-10 08:00:00").is_some());
        assert!(parse_timestamp("2025-11-10T08:00:00+00:00").is_some());
        assert!(parse_timestamp("10/11/2025").is_none());
    }
}
