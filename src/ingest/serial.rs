/// ESP32 serial line protocol for the main meter.
///
/// The meter firmware prints one line per second on the USB serial port:
///
///   Pulsos: 42 | Vazão: 1.23 L/min | 0.0205 L/s
///
/// interleaved with boot banners and debug chatter, so the reader filters
/// to lines that look like samples before parsing. Parsing is split from
/// transport: `parse_sample_line` works on any `&str`, the line reader on
/// any `BufRead`, and only `open_port` touches the actual device. Tests
/// therefore never need hardware.

use std::io::BufRead;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::ChannelConfig;
use crate::model::{lpm_to_lps, FlowReading, IngestError, METRIC_FLOW, METRIC_PULSES};

/// Baud rate the capture firmware configures.
pub const SERIAL_BAUD: u32 = 115_200;

/// Read timeout for the port; also bounds how long one daemon cycle can
/// block waiting for a quiet meter.
pub const READ_TIMEOUT_MS: u64 = 200;

// ---------------------------------------------------------------------------
// Line parsing
// ---------------------------------------------------------------------------

/// One parsed sample line from the meter.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialSample {
    pub pulses: i64,
    pub flow_lpm: f64,
    pub flow_lps: f64,
}

/// Whether a raw serial line looks like a sample (vs. boot/debug chatter).
pub fn is_sample_line(line: &str) -> bool {
    line.contains("Pulsos")
}

/// First whitespace-separated token in `part` that parses as a number.
/// Label tokens ("Pulsos:", "Vazão:", "L/min") never parse, so this skips
/// them without caring about accents or exact spelling.
fn numeric_token(part: &str) -> Option<f64> {
    part.split_whitespace().find_map(|tok| tok.parse::<f64>().ok())
}

/// Parses one sample line into a `SerialSample`.
///
/// # Errors
/// `IngestError::ParseError` when the line does not have three `|`-separated
/// fields each containing a number. Callers should filter with
/// `is_sample_line` first; chatter lines fail here by design.
pub fn parse_sample_line(line: &str) -> Result<SerialSample, IngestError> {
    let parts: Vec<&str> = line.split('|').collect();
    if parts.len() != 3 {
        return Err(IngestError::ParseError(format!(
            "expected 3 '|'-separated fields, got {} in '{}'",
            parts.len(),
            line.trim()
        )));
    }

    let pulses_f = numeric_token(parts[0])
        .ok_or_else(|| IngestError::ParseError(format!("no pulse count in '{}'", parts[0].trim())))?;
    let flow_lpm = numeric_token(parts[1])
        .ok_or_else(|| IngestError::ParseError(format!("no L/min value in '{}'", parts[1].trim())))?;
    let flow_lps = numeric_token(parts[2])
        .ok_or_else(|| IngestError::ParseError(format!("no L/s value in '{}'", parts[2].trim())))?;

    if pulses_f < 0.0 || pulses_f.fract() != 0.0 {
        return Err(IngestError::ParseError(format!(
            "pulse count must be a non-negative integer, got {}",
            pulses_f
        )));
    }

    Ok(SerialSample {
        pulses: pulses_f as i64,
        flow_lpm,
        flow_lps,
    })
}

impl SerialSample {
    /// Converts the sample into warehoused readings for the main channel,
    /// stamped at receipt time.
    ///
    /// The L/s value is recomputed from the L/min field rather than taken
    /// from the firmware's third column — the firmware rounds it to four
    /// decimals, and recomputing keeps the two metrics consistent.
    ///
    /// Returns an empty vec when the flow exceeds the channel's physical
    /// ceiling; a reading the sensor cannot produce is line noise, and the
    /// pulse count from the same line is equally untrustworthy.
    pub fn to_readings(&self, main: &ChannelConfig, timestamp: DateTime<Utc>) -> Vec<FlowReading> {
        let flow_lps = lpm_to_lps(self.flow_lpm);
        if flow_lps > main.max_plausible_lps || flow_lps < 0.0 {
            return Vec::new();
        }

        let datetime = timestamp.to_rfc3339();
        vec![
            FlowReading {
                channel_id: main.channel_id.clone(),
                channel_label: main.label.clone(),
                metric_code: METRIC_FLOW.to_string(),
                unit: "L/s".to_string(),
                value: flow_lps,
                datetime: datetime.clone(),
                quality: "L".to_string(),
            },
            FlowReading {
                channel_id: main.channel_id.clone(),
                channel_label: main.label.clone(),
                metric_code: METRIC_PULSES.to_string(),
                unit: "pulses".to_string(),
                value: self.pulses as f64,
                datetime,
                quality: "L".to_string(),
            },
        ]
    }
}

// ---------------------------------------------------------------------------
// Port reading
// ---------------------------------------------------------------------------

/// Opens the serial device at the firmware's baud rate with a short read
/// timeout, ready to wrap in a `BufReader`.
pub fn open_port(path: &str) -> Result<Box<dyn serialport::SerialPort>, IngestError> {
    serialport::new(path, SERIAL_BAUD)
        .timeout(Duration::from_millis(READ_TIMEOUT_MS))
        .open()
        .map_err(|e| IngestError::Io(std::io::Error::other(format!("{}: {}", path, e))))
}

/// Drains up to `max_lines` complete lines from the reader, stopping early
/// when the port goes quiet (read timeout) or EOF is reached. Partial
/// reads and timeouts are normal on a live port and are not errors.
pub fn drain_lines(reader: &mut impl BufRead, max_lines: usize) -> Vec<String> {
    let mut lines = Vec::new();

    for _ in 0..max_lines {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => lines.push(line),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(_) => break, // transient port error; next cycle retries
        }
    }

    lines
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fixtures::fixture_serial_lines;
    use chrono::TimeZone;

    fn main_channel() -> ChannelConfig {
        crate::config::load_config()
            .channels
            .into_iter()
            .find(|c| c.is_main())
            .expect("meters.toml should define a main channel")
    }

    #[test]
    fn test_parse_canonical_firmware_line() {
        let sample = parse_sample_line("Pulsos: 42 | Vazão: 1.23 L/min | 0.0205 L/s")
            .expect("canonical line should parse");
        assert_eq!(sample.pulses, 42);
        assert!((sample.flow_lpm - 1.23).abs() < 1e-9);
        assert!((sample.flow_lps - 0.0205).abs() < 1e-9);
    }

    #[test]
    fn test_parse_handles_zero_flow() {
        let sample = parse_sample_line("Pulsos: 0 | Vazão: 0.00 L/min | 0.0000 L/s")
            .expect("idle line should parse");
        assert_eq!(sample.pulses, 0);
        assert_eq!(sample.flow_lpm, 0.0);
    }

    #[test]
    fn test_parse_rejects_chatter_lines() {
        assert!(parse_sample_line("rst:0x1 (POWERON_RESET),boot:0x13").is_err());
        assert!(parse_sample_line("Sensor inicializado").is_err());
        assert!(parse_sample_line("").is_err());
    }

    #[test]
    fn test_parse_rejects_missing_field() {
        // Two fields only — truncated line from a mid-write read.
        assert!(parse_sample_line("Pulsos: 42 | Vazão: 1.23 L/min").is_err());
    }

    #[test]
    fn test_parse_rejects_fractional_pulse_count() {
        assert!(parse_sample_line("Pulsos: 4.5 | Vazão: 1.23 L/min | 0.0205 L/s").is_err());
    }

    #[test]
    fn test_is_sample_line_filters_fixture_chatter() {
        let lines = fixture_serial_lines();
        let samples: Vec<_> = lines
            .lines()
            .filter(|l| is_sample_line(l))
            .map(parse_sample_line)
            .collect();

        // The fixture has 3 sample lines among the chatter; all must parse.
        assert_eq!(samples.len(), 3);
        assert!(samples.iter().all(|s| s.is_ok()));
    }

    #[test]
    fn test_to_readings_produces_flow_and_pulses() {
        let main = main_channel();
        let ts = Utc.with_ymd_and_hms(2025, 11, 10, 8, 0, 0).unwrap();

        let sample = SerialSample { pulses: 42, flow_lpm: 1.23, flow_lps: 0.0205 };
        let readings = sample.to_readings(&main, ts);

        assert_eq!(readings.len(), 2);

        let flow = readings.iter().find(|r| r.metric_code == METRIC_FLOW).unwrap();
        assert!((flow.value - 1.23 / 60.0).abs() < 1e-9, "flow recomputed from L/min");
        assert_eq!(flow.unit, "L/s");
        assert_eq!(flow.quality, "L");

        let pulses = readings.iter().find(|r| r.metric_code == METRIC_PULSES).unwrap();
        assert_eq!(pulses.value, 42.0);
    }

    #[test]
    fn test_to_readings_drops_implausible_flow() {
        let main = main_channel();
        let ts = Utc.with_ymd_and_hms(2025, 11, 10, 8, 0, 0).unwrap();

        // 300 L/min is far beyond what a YF-S201 can register.
        let sample = SerialSample { pulses: 9999, flow_lpm: 300.0, flow_lps: 5.0 };
        assert!(sample.to_readings(&main, ts).is_empty());
    }

    #[test]
    fn test_drain_lines_reads_from_any_bufread() {
        let data = "Pulsos: 1 | Vazão: 0.5 L/min | 0.0083 L/s\nPulsos: 2 | Vazão: 0.6 L/min | 0.0100 L/s\n";
        let mut reader = std::io::BufReader::new(data.as_bytes());

        let lines = drain_lines(&mut reader, 10);
        assert_eq!(lines.len(), 2);

        // Drained to EOF; further calls return nothing.
        assert!(drain_lines(&mut reader, 10).is_empty());
    }

    #[test]
    fn test_drain_lines_respects_max() {
        let data = "a\nb\nc\nd\n";
        let mut reader = std::io::BufReader::new(data.as_bytes());
        assert_eq!(drain_lines(&mut reader, 2).len(), 2);
    }
}
