/// Shared data types for the water monitoring service.
///
/// Everything that crosses a module boundary lives here: flow readings as
/// produced by the ingest layer, the per-channel grouping struct, balance
/// thresholds, and the ingest error taxonomy. Other modules should reference
/// these types rather than defining their own variants.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Metric codes
// ---------------------------------------------------------------------------

/// Flow rate in litres per second. All warehoused flow values use this
/// metric regardless of the sensor's native unit; the main meter's L/min
/// wire value is converted at ingest.
pub const METRIC_FLOW: &str = "flow_lps";

/// Raw pulse count from the hall-effect meter since the last sample.
/// Only the main meter reports this.
pub const METRIC_PULSES: &str = "pulses";

/// YF-S201 calibration: the sensor emits 7.5 pulses per second per L/min,
/// which works out to 450 pulses per litre. Used as the default when a
/// channel's config does not override it.
pub const YFS201_PULSES_PER_LITRE: f64 = 450.0;

/// Converts a flow rate from L/min (the main meter's wire unit) to L/s.
pub fn lpm_to_lps(lpm: f64) -> f64 {
    lpm / 60.0
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// A single measurement from one channel.
///
/// The timestamp is kept as an RFC 3339 string until warehousing, which
/// keeps the ingest layer free of timezone decisions: serial samples are
/// stamped at receipt, CSV rows carry their logged timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowReading {
    /// Channel id from the registry ("main", "s1", ...).
    pub channel_id: String,
    /// Human-readable label from the registry ("Banheiro", ...).
    pub channel_label: String,
    /// One of `METRIC_FLOW` / `METRIC_PULSES`.
    pub metric_code: String,
    /// Unit of `value` ("L/s" or "pulses").
    pub unit: String,
    pub value: f64,
    /// RFC 3339 timestamp of the measurement.
    pub datetime: String,
    /// Provenance flag: "L" for live serial samples, "B" for readings
    /// backfilled or tailed from a CSV log.
    pub quality: String,
}

/// Latest readings for one channel, grouped by metric.
///
/// `flow_lps` is present for every reporting channel; `pulses` only for
/// the main meter.
#[derive(Debug, Clone)]
pub struct ChannelReadings {
    pub channel_id: String,
    pub flow_lps: Option<FlowReading>,
    pub pulses: Option<FlowReading>,
}

// ---------------------------------------------------------------------------
// Leak classification
// ---------------------------------------------------------------------------

/// How a balance anomaly presented itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeakKind {
    /// Main meter and branch sum disagree by more than the threshold while
    /// branches are reporting flow. Points at an unmetered draw or a
    /// miscalibrated sensor.
    Mismatch,
    /// Every branch reads zero while the main meter shows flow. Water is
    /// moving through no monitored fixture — the classic slab/underground
    /// leak signature.
    HiddenLeak,
}

impl LeakKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeakKind::Mismatch => "mismatch",
            LeakKind::HiddenLeak => "hidden_leak",
        }
    }
}

/// Balance differential thresholds, in L/s. Severity escalates through the
/// tiers in ascending order; `watch_lps < alert_lps < critical_lps` is
/// enforced by the config loader.
#[derive(Debug, Clone, PartialEq)]
pub struct LeakThresholds {
    pub watch_lps: f64,
    pub alert_lps: f64,
    pub critical_lps: f64,
}

// ---------------------------------------------------------------------------
// Ingest errors
// ---------------------------------------------------------------------------

/// Errors produced by the ingest layer (serial line protocol and CSV logs).
#[derive(Debug)]
pub enum IngestError {
    /// Malformed line, row, or header.
    ParseError(String),
    /// Structurally valid input that contained no usable samples.
    NoDataAvailable(String),
    /// Underlying I/O failure (serial port, file).
    Io(std::io::Error),
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::ParseError(msg) => write!(f, "parse error: {}", msg),
            IngestError::NoDataAvailable(msg) => write!(f, "no data available: {}", msg),
            IngestError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<std::io::Error> for IngestError {
    fn from(e: std::io::Error) -> Self {
        IngestError::Io(e)
    }
}

impl From<csv::Error> for IngestError {
    fn from(e: csv::Error) -> Self {
        IngestError::ParseError(format!("CSV error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lpm_to_lps_conversion() {
        // 1.23 L/min is the canonical example from the meter firmware;
        // it should come out as 0.0205 L/s.
        assert!((lpm_to_lps(1.23) - 0.0205).abs() < 1e-9);
        assert_eq!(lpm_to_lps(60.0), 1.0);
        assert_eq!(lpm_to_lps(0.0), 0.0);
    }

    #[test]
    fn test_yfs201_factor_matches_datasheet() {
        // Datasheet: f(Hz) = 7.5 * Q(L/min) => 7.5 * 60 pulses per litre.
        assert_eq!(YFS201_PULSES_PER_LITRE, 7.5 * 60.0);
    }

    #[test]
    fn test_leak_kind_labels_are_stable() {
        // These strings are persisted in leak_analysis.events; renaming
        // them would orphan existing rows.
        assert_eq!(LeakKind::Mismatch.as_str(), "mismatch");
        assert_eq!(LeakKind::HiddenLeak.as_str(), "hidden_leak");
    }
}
