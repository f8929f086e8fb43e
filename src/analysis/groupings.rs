/// Channel grouping and data organization utilities.
///
/// `group_by_channel` takes the flat list of `FlowReading`s produced by the
/// ingest layer and organizes them into per-channel `ChannelReadings`
/// structs, making it convenient to ask "what is the current flow on the
/// kitchen line?" without filtering a flat list every time.

use std::collections::HashMap;

use crate::model::{ChannelReadings, FlowReading, METRIC_FLOW, METRIC_PULSES};

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// Groups a flat list of `FlowReading`s into a map keyed by channel id.
///
/// Within each `ChannelReadings`, `flow_lps` is populated from the reading
/// with `metric_code == "flow_lps"` and `pulses` from `"pulses"`. If
/// multiple readings exist for the same channel and metric (normal when a
/// batch spans several log rows), the last one encountered wins — ingest
/// output is time-ordered, so that is the most recent sample.
pub fn group_by_channel(readings: Vec<FlowReading>) -> HashMap<String, ChannelReadings> {
    let mut grouped: HashMap<String, ChannelReadings> = HashMap::new();

    for reading in readings {
        let channel_id = reading.channel_id.clone();

        // Get or create the ChannelReadings entry for this channel
        let channel_readings = grouped
            .entry(channel_id.clone())
            .or_insert_with(|| ChannelReadings {
                channel_id: channel_id.clone(),
                flow_lps: None,
                pulses: None,
            });

        // Route by metric code
        match reading.metric_code.as_str() {
            METRIC_FLOW => channel_readings.flow_lps = Some(reading),
            METRIC_PULSES => channel_readings.pulses = Some(reading),
            _ => {}
        }
    }

    grouped
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelRegistry;
    use crate::ingest::{csvlog::parse_csv_log, fixtures::*};

    fn registry() -> ChannelRegistry {
        ChannelRegistry::load()
    }

    #[test]
    fn test_group_by_channel_associates_flow_and_pulses_for_main() {
        let readings =
            parse_csv_log(fixture_csv_log().as_bytes(), &registry()).expect("fixture should parse");
        let grouped = group_by_channel(readings);

        let main = grouped.get("main").expect("main should be in grouped results");

        assert_eq!(main.channel_id, "main");
        assert!(main.flow_lps.is_some(), "should have flow reading");
        assert!(main.pulses.is_some(), "should have pulse reading");
    }

    #[test]
    fn test_group_by_channel_branches_have_flow_only() {
        let readings =
            parse_csv_log(fixture_csv_log().as_bytes(), &registry()).expect("fixture should parse");
        let grouped = group_by_channel(readings);

        for id in ["s1", "s2", "s3", "s4"] {
            let branch = grouped.get(id).expect("branch should be in grouped results");
            assert!(branch.flow_lps.is_some(), "{} should have a flow reading", id);
            assert!(branch.pulses.is_none(), "{} has no pulse meter", id);
        }
    }

    #[test]
    fn test_group_by_channel_produces_one_entry_per_channel() {
        let readings =
            parse_csv_log(fixture_csv_log().as_bytes(), &registry()).expect("fixture should parse");
        let grouped = group_by_channel(readings);
        // Fixture covers the full registry: main + 4 branches.
        assert_eq!(grouped.len(), 5, "should have exactly 5 channel entries");
    }

    #[test]
    fn test_group_by_channel_last_reading_wins() {
        let readings =
            parse_csv_log(fixture_csv_log().as_bytes(), &registry()).expect("fixture should parse");
        let grouped = group_by_channel(readings);

        // The last fixture row is all zeros; the surviving reading per
        // channel must come from it.
        let main = grouped.get("main").expect("main should be present");
        let flow = main.flow_lps.as_ref().expect("should have flow");
        assert_eq!(flow.value, 0.0);
        assert!(flow.datetime.starts_with("2025-11-10T08:00:05"));
    }

    #[test]
    fn test_group_by_channel_empty_input_returns_empty_map() {
        let grouped = group_by_channel(vec![]);
        assert!(grouped.is_empty(), "empty input should produce empty map");
    }
}
