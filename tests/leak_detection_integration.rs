/// Integration tests for the leak detection pipeline.
///
/// Exercises the full chain the daemon runs every cycle, with no database
/// or hardware: CSV log / serial lines → readings → balance series →
/// live threshold check and batch window extraction.
///
/// The scenario payloads mirror real capture sessions: a balanced
/// morning, a garden-tap mismatch, and an overnight hidden leak.

use aquamon_service::alert::thresholds::{check_flow_balance, LeakSeverity};
use aquamon_service::analysis::balance::build_balance_series;
use aquamon_service::analysis::groupings::group_by_channel;
use aquamon_service::analysis::leak_events::{detect_leak_events, LeakAnalysisConfig};
use aquamon_service::analysis::usage::{aggregate_volumes, integrate_channel_volumes, Period};
use aquamon_service::channels::ChannelRegistry;
use aquamon_service::config;
use aquamon_service::ingest::csvlog::parse_csv_log;
use aquamon_service::ingest::serial::{is_sample_line, parse_sample_line};
use aquamon_service::model::{LeakKind, LeakThresholds, METRIC_FLOW};

// ---------------------------------------------------------------------------
// Scenario payloads
// ---------------------------------------------------------------------------

const HEADER: &str =
    "Timestamp,Pulsos,Vazão (L/min),S1 – Vazão (L/s),S2 – Vazão (L/s),S3- Vazão (L/s),S4 – Vazão (L/s)";

/// Normal morning: shower then kitchen, branches explain the main meter.
fn balanced_morning() -> String {
    format!(
        "{HEADER}\n\
         2025-11-10 07:00:00,90,12.0,0.2,0.0,0.0,0.0\n\
         2025-11-10 07:00:01,90,12.0,0.2,0.0,0.0,0.0\n\
         2025-11-10 07:00:02,45,6.0,0.0,0.1,0.0,0.0\n\
         2025-11-10 07:00:03,45,6.0,0.0,0.1,0.0,0.0\n\
         2025-11-10 07:00:04,0,0.0,0.0,0.0,0.0,0.0\n"
    )
}

/// Garden-tap scenario: a hose bib upstream of sensor s3 bursts; the main
/// meter runs 0.3 L/s above what the branches can account for.
fn garden_mismatch() -> String {
    format!(
        "{HEADER}\n\
         2025-11-10 14:00:00,90,12.0,0.1,0.1,0.0,0.0\n\
         2025-11-10 14:00:01,225,30.0,0.1,0.1,0.0,0.0\n\
         2025-11-10 14:00:02,225,30.0,0.1,0.1,0.0,0.0\n\
         2025-11-10 14:00:03,225,30.0,0.1,0.1,0.0,0.0\n\
         2025-11-10 14:00:04,90,12.0,0.1,0.1,0.0,0.0\n"
    )
}

/// Overnight hidden leak: the house is asleep, every branch reads zero,
/// and the main meter ticks at 0.05 L/s for three seconds.
fn overnight_hidden_leak() -> String {
    format!(
        "{HEADER}\n\
         2025-11-10 03:00:00,0,0.0,0.0,0.0,0.0,0.0\n\
         2025-11-10 03:00:01,23,3.0,0.0,0.0,0.0,0.0\n\
         2025-11-10 03:00:02,23,3.0,0.0,0.0,0.0,0.0\n\
         2025-11-10 03:00:03,23,3.0,0.0,0.0,0.0,0.0\n\
         2025-11-10 03:00:04,0,0.0,0.0,0.0,0.0,0.0\n"
    )
}

fn registry() -> ChannelRegistry {
    ChannelRegistry::load()
}

fn thresholds() -> LeakThresholds {
    (&config::load_config().balance).into()
}

// ---------------------------------------------------------------------------
// Pipeline: parse → group
// ---------------------------------------------------------------------------

#[test]
fn test_pipeline_parse_and_group_balanced_morning() {
    let reg = registry();
    let readings = parse_csv_log(balanced_morning().as_bytes(), &reg).expect("log should parse");
    let grouped = group_by_channel(readings);

    assert_eq!(grouped.len(), 5, "main + 4 branches");
    let main = grouped.get("main").expect("main present");
    assert!(main.flow_lps.is_some());
    assert!(main.pulses.is_some());
}

// ---------------------------------------------------------------------------
// Pipeline: parse → balance → live threshold check
// ---------------------------------------------------------------------------

#[test]
fn test_pipeline_balanced_morning_raises_no_alerts() {
    let reg = registry();
    let readings = parse_csv_log(balanced_morning().as_bytes(), &reg).expect("log should parse");
    let series = build_balance_series(&readings, &reg, 120.0);
    let thresholds = thresholds();

    for sample in &series {
        assert!(
            check_flow_balance(sample, &thresholds).is_none(),
            "balanced sample at {} should not alert",
            sample.timestamp
        );
    }
}

#[test]
fn test_pipeline_garden_mismatch_alerts_at_alert_severity() {
    let reg = registry();
    let readings = parse_csv_log(garden_mismatch().as_bytes(), &reg).expect("log should parse");
    let series = build_balance_series(&readings, &reg, 120.0);
    let thresholds = thresholds();

    let alerts: Vec<_> = series
        .iter()
        .filter_map(|s| check_flow_balance(s, &thresholds))
        .collect();

    assert_eq!(alerts.len(), 3, "three abnormal seconds");
    for alert in &alerts {
        assert_eq!(alert.kind, LeakKind::Mismatch);
        assert_eq!(
            alert.severity,
            LeakSeverity::Alert,
            "0.3 L/s differential sits in the alert tier (0.2..0.6)"
        );
    }
}

#[test]
fn test_pipeline_overnight_leak_flagged_hidden_despite_small_flow() {
    let reg = registry();
    let readings =
        parse_csv_log(overnight_hidden_leak().as_bytes(), &reg).expect("log should parse");
    let series = build_balance_series(&readings, &reg, 120.0);
    let thresholds = thresholds();

    let alerts: Vec<_> = series
        .iter()
        .filter_map(|s| check_flow_balance(s, &thresholds))
        .collect();

    // 0.05 L/s alone would only be a watch, but with every branch idle it
    // is a hidden leak and must not be reported below alert severity.
    assert_eq!(alerts.len(), 3);
    for alert in &alerts {
        assert_eq!(alert.kind, LeakKind::HiddenLeak);
        assert!(alert.severity >= LeakSeverity::Alert);
    }
}

// ---------------------------------------------------------------------------
// Pipeline: parse → balance → event windows
// ---------------------------------------------------------------------------

#[test]
fn test_pipeline_garden_mismatch_becomes_one_event() {
    let reg = registry();
    let readings = parse_csv_log(garden_mismatch().as_bytes(), &reg).expect("log should parse");
    let series = build_balance_series(&readings, &reg, 120.0);

    let events = detect_leak_events(&series, &LeakAnalysisConfig::default());
    assert_eq!(events.len(), 1);

    let event = &events[0];
    assert_eq!(event.kind, LeakKind::Mismatch);
    assert_eq!(event.sample_count, 3);
    assert!((event.max_diff_lps - 0.3).abs() < 1e-9);
    // 0.3 L/s unexplained for three one-second samples.
    assert!((event.lost_volume_l - 0.9).abs() < 1e-6);
}

#[test]
fn test_pipeline_overnight_leak_becomes_one_hidden_event() {
    let reg = registry();
    let readings =
        parse_csv_log(overnight_hidden_leak().as_bytes(), &reg).expect("log should parse");
    let series = build_balance_series(&readings, &reg, 120.0);

    let events = detect_leak_events(&series, &LeakAnalysisConfig::default());
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, LeakKind::HiddenLeak);
    // 0.05 L/s for three seconds: 0.15 L slipped past the fixtures.
    assert!((events[0].lost_volume_l - 0.15).abs() < 1e-6);
}

#[test]
fn test_pipeline_balanced_morning_has_no_events() {
    let reg = registry();
    let readings = parse_csv_log(balanced_morning().as_bytes(), &reg).expect("log should parse");
    let series = build_balance_series(&readings, &reg, 120.0);

    assert!(detect_leak_events(&series, &LeakAnalysisConfig::default()).is_empty());
}

// ---------------------------------------------------------------------------
// Pipeline: parse → integrate → aggregate
// ---------------------------------------------------------------------------

#[test]
fn test_pipeline_volume_aggregation_of_the_morning() {
    let reg = registry();
    let readings = parse_csv_log(balanced_morning().as_bytes(), &reg).expect("log should parse");

    let volumes = integrate_channel_volumes(&readings, "main", 120.0);
    let hourly = aggregate_volumes(&volumes, Period::Hour);

    assert_eq!(hourly.len(), 1, "all samples fall in the 07:00 bucket");
    // 0.2 + 0.2 + 0.1 + 0.1 + 0.0 litres over the five seconds.
    assert!((hourly[0].volume_l - 0.6).abs() < 1e-9);
}

// ---------------------------------------------------------------------------
// Serial path joins the same pipeline
// ---------------------------------------------------------------------------

#[test]
fn test_serial_lines_reach_the_warehouse_shape() {
    let lines = "boot banner\n\
                 Pulsos: 90 | Vazão: 12.00 L/min | 0.2000 L/s\n\
                 Pulsos: 0 | Vazão: 0.00 L/min | 0.0000 L/s\n";

    let reg = registry();
    let main = reg.main();
    let now = chrono::Utc::now();

    let readings: Vec<_> = lines
        .lines()
        .filter(|l| is_sample_line(l))
        .filter_map(|l| parse_sample_line(l).ok())
        .flat_map(|s| s.to_readings(main, now))
        .collect();

    // Two samples × (flow + pulses)
    assert_eq!(readings.len(), 4);
    assert!(readings.iter().all(|r| r.channel_id == "main"));
    assert!(readings.iter().any(|r| r.metric_code == METRIC_FLOW && (r.value - 0.2).abs() < 1e-9));
}
