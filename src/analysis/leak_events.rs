/// Leak Event Analysis Module
///
/// Extracts leak events from a flow balance series and builds relational
/// records of them for later review.
///
/// # Analysis Process
///
/// 1. **Window Detection**
///    - Walk the balance series in time order
///    - A sample is abnormal when its differential exceeds the mismatch
///      threshold, or when every branch reads zero while the main meter
///      registers flow (hidden leak signature)
///    - Contiguous abnormal samples form one event window
///
/// 2. **Classification**
///    - `hidden_leak` when branches were silent for the whole window
///    - `mismatch` otherwise
///
/// 3. **Metric Computation**
///    - Duration, peak differential, sample count
///    - Lost volume: the unexplained differential integrated over the
///      window (for a hidden leak this equals the main meter volume,
///      since the branch sum is zero)
///
/// # Output
///
/// Populates the `leak_analysis` schema with event rows and their
/// per-sample observations, phase-tagged (onset / active / peak).

use chrono::{DateTime, Utc};
use postgres::Client;
use rust_decimal::Decimal;

use crate::analysis::balance::{build_balance_series, BalanceSample};
use crate::channels::ChannelRegistry;
use crate::model::{FlowReading, LeakKind};

/// Analysis configuration
#[derive(Debug, Clone)]
pub struct LeakAnalysisConfig {
    /// Differential (L/s) above which a sample counts as a mismatch.
    pub mismatch_threshold_lps: f64,

    /// Main-meter flow (L/s) above which silent branches count as a
    /// hidden leak. Slightly above zero to ignore meter jitter.
    pub hidden_leak_min_lps: f64,

    /// Events shorter than this are discarded as sensor noise.
    pub min_event_duration_seconds: f64,
}

impl Default for LeakAnalysisConfig {
    fn default() -> Self {
        Self {
            mismatch_threshold_lps: 0.2,
            hidden_leak_min_lps: 0.02,
            min_event_duration_seconds: 0.0,
        }
    }
}

/// One detected leak event.
#[derive(Debug, Clone)]
pub struct LeakEvent {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_seconds: f64,
    pub kind: LeakKind,
    pub max_diff_lps: f64,
    pub lost_volume_l: f64,
    pub sample_count: usize,
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

fn is_abnormal(sample: &BalanceSample, config: &LeakAnalysisConfig) -> bool {
    let mismatch = sample.diff_lps > config.mismatch_threshold_lps;
    let hidden = sample.branch_total_lps == 0.0 && sample.main_lps > config.hidden_leak_min_lps;
    mismatch || hidden
}

fn close_window(window: &[BalanceSample], config: &LeakAnalysisConfig) -> Option<LeakEvent> {
    let first = window.first()?;
    let last = window.last()?;

    // Hidden only when the branches were silent throughout — a window
    // where branches flowed for even one sample is a metering mismatch.
    let all_branches_silent = window.iter().all(|s| s.branch_total_lps == 0.0);
    let any_main_flow = window.iter().any(|s| s.main_lps > config.hidden_leak_min_lps);
    let kind = if all_branches_silent && any_main_flow {
        LeakKind::HiddenLeak
    } else {
        LeakKind::Mismatch
    };

    let duration_seconds = if window.len() > 1 {
        (last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0
    } else {
        first.delta_seconds
    };

    if duration_seconds < config.min_event_duration_seconds {
        return None;
    }

    let max_diff_lps = window.iter().map(|s| s.diff_lps).fold(0.0, f64::max);
    let lost_volume_l = window.iter().map(|s| s.diff_lps * s.delta_seconds).sum();

    Some(LeakEvent {
        start: first.timestamp,
        end: last.timestamp,
        duration_seconds,
        kind,
        max_diff_lps,
        lost_volume_l,
        sample_count: window.len(),
    })
}

/// Extracts leak events from a time-ordered balance series.
///
/// A window stays open while samples remain abnormal and closes on the
/// first normal sample; a window still open at the end of the series is
/// closed there (an ongoing leak is still an event).
pub fn detect_leak_events(
    series: &[BalanceSample],
    config: &LeakAnalysisConfig,
) -> Vec<LeakEvent> {
    let mut events = Vec::new();
    let mut window: Vec<BalanceSample> = Vec::new();

    for sample in series {
        if is_abnormal(sample, config) {
            window.push(sample.clone());
        } else if !window.is_empty() {
            events.extend(close_window(&window, config));
            window.clear();
        }
    }

    // Close a trailing open window
    if !window.is_empty() {
        events.extend(close_window(&window, config));
    }

    events
}

// ---------------------------------------------------------------------------
// Database operations
// ---------------------------------------------------------------------------

/// Load analysis configuration from the database, falling back to the
/// compiled defaults when no active row exists yet.
pub fn load_config(client: &mut Client) -> Result<LeakAnalysisConfig, Box<dyn std::error::Error>> {
    let rows = client.query(
        "SELECT
            mismatch_threshold_lps,
            hidden_leak_min_lps,
            min_event_duration_seconds
         FROM leak_analysis.analysis_config
         WHERE is_active = true
         ORDER BY created_at DESC
         LIMIT 1",
        &[],
    )?;

    let Some(row) = rows.first() else {
        return Ok(LeakAnalysisConfig::default());
    };

    Ok(LeakAnalysisConfig {
        mismatch_threshold_lps: row.get::<_, Decimal>(0).to_string().parse()?,
        hidden_leak_min_lps: row.get::<_, Decimal>(1).to_string().parse()?,
        min_event_duration_seconds: row.get::<_, Decimal>(2).to_string().parse()?,
    })
}

/// Load warehoused flow readings within a time window, flat and
/// time-ordered, ready for `build_balance_series`.
pub fn load_readings(
    client: &mut Client,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<FlowReading>, Box<dyn std::error::Error>> {
    let rows = client.query(
        "SELECT channel_id, channel_label, metric_code, unit, value, reading_time, quality
         FROM telemetry.flow_readings
         WHERE reading_time BETWEEN $1 AND $2
         ORDER BY reading_time",
        &[&start, &end],
    )?;

    let mut readings = Vec::new();
    for row in rows {
        let value: Decimal = row.get(4);
        let reading_time: DateTime<Utc> = row.get(5);
        readings.push(FlowReading {
            channel_id: row.get(0),
            channel_label: row.get(1),
            metric_code: row.get(2),
            unit: row.get(3),
            value: value.to_string().parse().unwrap_or(0.0),
            datetime: reading_time.to_rfc3339(),
            quality: row.get(6),
        });
    }

    Ok(readings)
}

/// Persist one detected event and its samples into the leak_analysis
/// schema. Returns the new event id.
pub fn persist_event(
    client: &mut Client,
    event: &LeakEvent,
    window: &[BalanceSample],
) -> Result<i32, Box<dyn std::error::Error>> {
    let event_id: i32 = client
        .query_one(
            "INSERT INTO leak_analysis.events (
                event_start, event_end, duration_seconds, kind,
                max_diff_lps, lost_volume_l, sample_count, analysis_version
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING id",
            &[
                &event.start,
                &event.end,
                &Decimal::try_from(event.duration_seconds).ok(),
                &event.kind.as_str(),
                &Decimal::try_from(event.max_diff_lps).ok(),
                &Decimal::try_from(event.lost_volume_l).ok(),
                &(event.sample_count as i32),
                &"1.0",
            ],
        )?
        .get(0);

    // Peak sample gets its own phase tag; the first sample is the onset
    // unless it is also the peak.
    let peak_idx = window
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.diff_lps.total_cmp(&b.diff_lps))
        .map(|(i, _)| i);

    for (i, sample) in window.iter().enumerate() {
        let phase = if Some(i) == peak_idx {
            "peak"
        } else if i == 0 {
            "onset"
        } else {
            "active"
        };

        client.execute(
            "INSERT INTO leak_analysis.event_samples
             (event_id, sample_time, phase, main_lps, branch_total_lps, diff_lps)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (event_id, sample_time) DO NOTHING",
            &[
                &event_id,
                &sample.timestamp,
                &phase,
                &Decimal::try_from(sample.main_lps).ok(),
                &Decimal::try_from(sample.branch_total_lps).ok(),
                &Decimal::try_from(sample.diff_lps).ok(),
            ],
        )?;
    }

    Ok(event_id)
}

/// Analyze a time window of warehoused readings end to end: load, build
/// the balance series, detect events, persist them. Returns how many
/// events were stored.
pub fn analyze_window(
    client: &mut Client,
    registry: &ChannelRegistry,
    config: &LeakAnalysisConfig,
    max_gap_seconds: f64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<usize, Box<dyn std::error::Error>> {
    let readings = load_readings(client, start, end)?;

    if readings.is_empty() {
        println!("    ⚠ No readings found in window, skipping");
        return Ok(0);
    }

    let series = build_balance_series(&readings, registry, max_gap_seconds);
    let events = detect_leak_events(&series, config);

    let mut stored = 0;
    for event in &events {
        // Re-slice the window for sample persistence
        let window: Vec<BalanceSample> = series
            .iter()
            .filter(|s| s.timestamp >= event.start && s.timestamp <= event.end)
            .cloned()
            .collect();

        let event_id = persist_event(client, event, &window)?;
        println!(
            "    ✓ Event {}: {} from {} ({:.1} s, peak {:.3} L/s, {:.2} L lost)",
            event_id,
            event.kind.as_str(),
            event.start.format("%Y-%m-%d %H:%M:%S"),
            event.duration_seconds,
            event.max_diff_lps,
            event.lost_volume_l
        );
        stored += 1;
    }

    Ok(stored)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
