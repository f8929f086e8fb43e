/// Flow balance series construction.
///
/// Aligns the main meter against the sum of branch sensors, one sample per
/// logged instant, and integrates per-sample volumes from the true
/// inter-sample deltas. The leak detector and the usage aggregator both
/// consume this series.
///
/// Alignment rules:
/// - A balance sample requires a main-meter flow reading at that instant.
/// - At least one branch sensor must have reported at the same instant;
///   a branch that is silent while others report counts as 0.0 (the
///   capture script writes explicit zeros, so silence within a reported
///   row is a dropped cell, not a dropped sensor). Instants with no
///   branch data at all are skipped — a main-only stream (live serial
///   without the CSV tail) cannot be balanced and must not masquerade as
///   a hidden leak.
/// - Inter-sample deltas are clamped to `max_gap_seconds` so a capture
///   outage is not integrated as consumption. The first sample of a
///   series integrates over one second, matching the capture cadence.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

use crate::channels::ChannelRegistry;
use crate::model::{FlowReading, METRIC_FLOW};

/// Seconds integrated for the first sample of a series, where no previous
/// timestamp exists. Matches the capture script's one-second cadence.
pub const FIRST_SAMPLE_DELTA_SECONDS: f64 = 1.0;

// ---------------------------------------------------------------------------
// Balance samples
// ---------------------------------------------------------------------------

/// One time-aligned comparison of the main meter against the branch sum.
#[derive(Debug, Clone)]
pub struct BalanceSample {
    pub timestamp: DateTime<Utc>,
    /// Main meter flow, L/s.
    pub main_lps: f64,
    /// Sum of branch sensor flows, L/s.
    pub branch_total_lps: f64,
    /// Absolute differential |main - branches|, L/s.
    pub diff_lps: f64,
    /// How many branch sensors reported at this instant.
    pub branch_coverage: usize,
    /// Seconds integrated for this sample (clamped).
    pub delta_seconds: f64,
    /// Volume through the main meter over the delta, litres.
    pub main_volume_l: f64,
    /// Volume through the branches over the delta, litres.
    pub branch_volume_l: f64,
}

/// Builds a time-ordered balance series from a flat batch of readings.
///
/// Only `flow_lps` readings participate; pulse readings are ignored.
/// Duplicate readings for the same channel at the same instant collapse
/// last-wins, like the grouping layer.
pub fn build_balance_series(
    readings: &[FlowReading],
    registry: &ChannelRegistry,
    max_gap_seconds: f64,
) -> Vec<BalanceSample> {
    let main_id = &registry.main().channel_id;

    // Bucket flow readings by instant, last-wins per channel.
    let mut buckets: BTreeMap<DateTime<Utc>, HashMap<&str, f64>> = BTreeMap::new();
    for reading in readings {
        if reading.metric_code != METRIC_FLOW {
            continue;
        }
        let Ok(timestamp) = DateTime::parse_from_rfc3339(&reading.datetime) else {
            continue;
        };
        let timestamp = timestamp.with_timezone(&Utc);

        if registry.find(&reading.channel_id).is_none() {
            continue;
        }
        buckets
            .entry(timestamp)
            .or_default()
            .insert(reading.channel_id.as_str(), reading.value);
    }

    let mut series = Vec::new();
    let mut previous: Option<DateTime<Utc>> = None;

    for (timestamp, values) in buckets {
        let Some(&main_lps) = values.get(main_id.as_str()) else {
            continue;
        };

        let branch_values: Vec<f64> = registry
            .branches()
            .iter()
            .filter_map(|c| values.get(c.channel_id.as_str()).copied())
            .collect();

        if branch_values.is_empty() {
            continue;
        }

        let branch_total_lps: f64 = branch_values.iter().sum();

        let delta_seconds = match previous {
            Some(prev) => {
                let raw = (timestamp - prev).num_milliseconds() as f64 / 1000.0;
                if raw <= 0.0 {
                    continue;
                }
                raw.min(max_gap_seconds)
            }
            None => FIRST_SAMPLE_DELTA_SECONDS,
        };
        previous = Some(timestamp);

        series.push(BalanceSample {
            timestamp,
            main_lps,
            branch_total_lps,
            diff_lps: (main_lps - branch_total_lps).abs(),
            branch_coverage: branch_values.len(),
            delta_seconds,
            main_volume_l: main_lps * delta_seconds,
            branch_volume_l: branch_total_lps * delta_seconds,
        });
    }

    series
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
