/// Consumption aggregation and cost estimation.
///
/// Turns warehoused flow readings into per-sample volumes, rolls them up
/// into calendar buckets (hour / day / week / month), and prices them
/// against the configured tariff. The daemon keeps the
/// `consumption.hourly_volumes` table current incrementally; the helpers
/// here also work on in-memory series for tests and batch tools.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use postgres::Client;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::analysis::balance::FIRST_SAMPLE_DELTA_SECONDS;
use crate::model::{FlowReading, METRIC_FLOW};

// ---------------------------------------------------------------------------
// Periods
// ---------------------------------------------------------------------------

/// Calendar bucket sizes for aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Hour,
    Day,
    Week,
    Month,
}

impl Period {
    /// Start of the bucket containing `ts`. Weeks start on Monday.
    pub fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let date = ts.date_naive();
        match self {
            Period::Hour => date.and_hms_opt(ts.hour(), 0, 0).unwrap().and_utc(),
            Period::Day => date.and_hms_opt(0, 0, 0).unwrap().and_utc(),
            Period::Week => {
                let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
                monday.and_hms_opt(0, 0, 0).unwrap().and_utc()
            }
            Period::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
                .and_utc(),
        }
    }
}

/// Aggregated volume for one calendar bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageSummary {
    pub period_start: DateTime<Utc>,
    pub volume_l: f64,
}

impl UsageSummary {
    pub fn volume_m3(&self) -> f64 {
        self.volume_l / 1000.0
    }

    /// Estimated cost at the given R$/m³ tariff.
    pub fn cost(&self, tariff_per_m3: f64) -> f64 {
        self.volume_m3() * tariff_per_m3
    }
}

// ---------------------------------------------------------------------------
// Volume integration
// ---------------------------------------------------------------------------

/// Integrates per-sample volumes for one channel from a flat reading
/// batch: volume = flow (L/s) × seconds since the channel's previous
/// sample, clamped to `max_gap_seconds`. The first sample integrates over
/// one second (capture cadence).
pub fn integrate_channel_volumes(
    readings: &[FlowReading],
    channel_id: &str,
    max_gap_seconds: f64,
) -> Vec<(DateTime<Utc>, f64)> {
    let mut samples: Vec<(DateTime<Utc>, f64)> = readings
        .iter()
        .filter(|r| r.channel_id == channel_id && r.metric_code == METRIC_FLOW)
        .filter_map(|r| {
            DateTime::parse_from_rfc3339(&r.datetime)
                .ok()
                .map(|ts| (ts.with_timezone(&Utc), r.value))
        })
        .collect();
    samples.sort_by_key(|(ts, _)| *ts);
    samples.dedup_by_key(|(ts, _)| *ts);

    let mut volumes = Vec::with_capacity(samples.len());
    let mut previous: Option<DateTime<Utc>> = None;

    for (ts, flow_lps) in samples {
        let delta = match previous {
            Some(prev) => {
                let raw = (ts - prev).num_milliseconds() as f64 / 1000.0;
                raw.min(max_gap_seconds)
            }
            None => FIRST_SAMPLE_DELTA_SECONDS,
        };
        previous = Some(ts);
        volumes.push((ts, flow_lps * delta));
    }

    volumes
}

/// Rolls per-sample volumes into calendar buckets, time-ordered.
pub fn aggregate_volumes(
    volumes: &[(DateTime<Utc>, f64)],
    period: Period,
) -> Vec<UsageSummary> {
    let mut buckets: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
    for (ts, volume_l) in volumes {
        *buckets.entry(period.truncate(*ts)).or_insert(0.0) += volume_l;
    }

    buckets
        .into_iter()
        .map(|(period_start, volume_l)| UsageSummary { period_start, volume_l })
        .collect()
}

/// Total volume at or after `since`.
pub fn window_total(volumes: &[(DateTime<Utc>, f64)], since: DateTime<Utc>) -> f64 {
    volumes
        .iter()
        .filter(|(ts, _)| *ts >= since)
        .map(|(_, v)| v)
        .sum()
}

// ---------------------------------------------------------------------------
// Summary cards
// ---------------------------------------------------------------------------

/// The headline numbers external tools display: consumption today, over
/// the trailing week and month, and the month's estimated cost.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConsumptionCards {
    pub today_l: f64,
    pub last_7_days_l: f64,
    pub last_30_days_l: f64,
    pub month_cost_estimate: f64,
}

/// Builds the cards from an in-memory volume series.
pub fn build_cards(
    volumes: &[(DateTime<Utc>, f64)],
    now: DateTime<Utc>,
    tariff_per_m3: f64,
) -> ConsumptionCards {
    let today_start = Period::Day.truncate(now);
    let week_start = now - Duration::days(7);
    let month_start = now - Duration::days(30);

    let last_30_days_l = window_total(volumes, month_start);

    ConsumptionCards {
        today_l: window_total(volumes, today_start),
        last_7_days_l: window_total(volumes, week_start),
        last_30_days_l,
        month_cost_estimate: (last_30_days_l / 1000.0) * tariff_per_m3,
    }
}

// ---------------------------------------------------------------------------
// Database-backed variants
// ---------------------------------------------------------------------------

/// Total warehoused volume for a channel since a point in time.
pub fn fetch_window_total(
    client: &mut Client,
    channel_id: &str,
    since: DateTime<Utc>,
) -> Result<f64, Box<dyn std::error::Error>> {
    let row = client.query_one(
        "SELECT COALESCE(SUM(volume_l), 0)
         FROM consumption.hourly_volumes
         WHERE channel_id = $1 AND bucket_start >= $2",
        &[&channel_id, &since],
    )?;

    let total: Decimal = row.get(0);
    Ok(total.to_string().parse()?)
}

/// Daily volume series for a channel over the trailing `days`, oldest
/// first. Feeds the forecaster.
pub fn fetch_daily_volumes(
    client: &mut Client,
    channel_id: &str,
    days: i32,
) -> Result<Vec<(DateTime<Utc>, f64)>, Box<dyn std::error::Error>> {
    let rows = client.query(
        "SELECT date_trunc('day', bucket_start) AS day, SUM(volume_l)
         FROM consumption.hourly_volumes
         WHERE channel_id = $1
           AND bucket_start >= now() - make_interval(days => $2)
         GROUP BY day
         ORDER BY day",
        &[&channel_id, &days],
    )?;

    let mut series = Vec::new();
    for row in rows {
        let day: DateTime<Utc> = row.get(0);
        let volume: Decimal = row.get(1);
        series.push((day, volume.to_string().parse().unwrap_or(0.0)));
    }

    Ok(series)
}

/// Builds the summary cards for a channel straight from the warehouse.
pub fn build_cards_from_db(
    client: &mut Client,
    channel_id: &str,
    now: DateTime<Utc>,
    tariff_per_m3: f64,
) -> Result<ConsumptionCards, Box<dyn std::error::Error>> {
    let today_l = fetch_window_total(client, channel_id, Period::Day.truncate(now))?;
    let last_7_days_l = fetch_window_total(client, channel_id, now - Duration::days(7))?;
    let last_30_days_l = fetch_window_total(client, channel_id, now - Duration::days(30))?;

    Ok(ConsumptionCards {
        today_l,
        last_7_days_l,
        last_30_days_l,
        month_cost_estimate: (last_30_days_l / 1000.0) * tariff_per_m3,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelRegistry;
    use crate::ingest::{csvlog::parse_csv_log, fixtures::fixture_csv_log};
    use chrono::TimeZone;

    fn ts(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 10, h, m, s).unwrap()
    }

    #[test]
    fn test_truncate_hour_day_week_month() {
        let t = Utc.with_ymd_and_hms(2025, 11, 12, 14, 37, 55).unwrap(); // a Wednesday

        assert_eq!(Period::Hour.truncate(t), Utc.with_ymd_and_hms(2025, 11, 12, 14, 0, 0).unwrap());
        assert_eq!(Period::Day.truncate(t), Utc.with_ymd_and_hms(2025, 11, 12, 0, 0, 0).unwrap());
        assert_eq!(
            Period::Week.truncate(t),
            Utc.with_ymd_and_hms(2025, 11, 10, 0, 0, 0).unwrap(),
            "week starts on the preceding Monday"
        );
        assert_eq!(Period::Month.truncate(t), Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_integrate_main_channel_from_fixture() {
        let registry = ChannelRegistry::load();
        let readings =
            parse_csv_log(fixture_csv_log().as_bytes(), &registry).expect("fixture should parse");

        let volumes = integrate_channel_volumes(&readings, "main", 120.0);
        assert_eq!(volumes.len(), 6);

        // Per-row main flows: 0.2, 0.2, 0.21, 0.2, 0.15, 0.0 L/s, one
        // second each => 0.96 L total.
        let total: f64 = volumes.iter().map(|(_, v)| v).sum();
        assert!((total - 0.96).abs() < 1e-9, "got {}", total);
    }

    #[test]
    fn test_aggregate_into_hourly_buckets() {
        let volumes = vec![
            (ts(8, 0, 0), 1.0),
            (ts(8, 30, 0), 2.0),
            (ts(9, 0, 0), 4.0),
        ];

        let hourly = aggregate_volumes(&volumes, Period::Hour);
        assert_eq!(hourly.len(), 2);
        assert_eq!(hourly[0].period_start, ts(8, 0, 0));
        assert_eq!(hourly[0].volume_l, 3.0);
        assert_eq!(hourly[1].volume_l, 4.0);
    }

    #[test]
    fn test_usage_summary_cost() {
        let summary = UsageSummary { period_start: ts(0, 0, 0), volume_l: 2500.0 };
        assert!((summary.volume_m3() - 2.5).abs() < 1e-12);
        assert!((summary.cost(4.50) - 11.25).abs() < 1e-9);
    }

    #[test]
    fn test_build_cards_windows() {
        let now = Utc.with_ymd_and_hms(2025, 11, 10, 12, 0, 0).unwrap();
        let volumes = vec![
            (now - Duration::hours(2), 10.0),  // today
            (now - Duration::days(3), 20.0),   // this week
            (now - Duration::days(20), 40.0),  // this month
            (now - Duration::days(45), 999.0), // outside every window
        ];

        let cards = build_cards(&volumes, now, 4.50);
        assert_eq!(cards.today_l, 10.0);
        assert_eq!(cards.last_7_days_l, 30.0);
        assert_eq!(cards.last_30_days_l, 70.0);
        assert!((cards.month_cost_estimate - 0.070 * 4.50).abs() < 1e-9);
    }

    #[test]
    fn test_gap_clamp_in_integration() {
        let make = |dt: DateTime<Utc>, v: f64| FlowReading {
            channel_id: "main".to_string(),
            channel_label: "Entrada principal".to_string(),
            metric_code: METRIC_FLOW.to_string(),
            unit: "L/s".to_string(),
            value: v,
            datetime: dt.to_rfc3339(),
            quality: "B".to_string(),
        };

        // 10-minute outage between samples: second volume clamps to
        // 0.2 L/s * 120 s.
        let readings = vec![make(ts(8, 0, 0), 0.2), make(ts(8, 10, 0), 0.2)];
        let volumes = integrate_channel_volumes(&readings, "main", 120.0);

        assert_eq!(volumes.len(), 2);
        assert!((volumes[1].1 - 24.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_series_behaves() {
        assert!(integrate_channel_volumes(&[], "main", 120.0).is_empty());
        assert!(aggregate_volumes(&[], Period::Day).is_empty());
        assert_eq!(window_total(&[], ts(0, 0, 0)), 0.0);
    }
}
