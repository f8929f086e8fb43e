/// Real-time monitoring service with database-backed staleness tracking.
///
/// ## Architecture: Hybrid Database + In-Memory
///
/// **Database (source of truth):**
/// - `telemetry.monitoring_state` table tracks polling state per channel
/// - `telemetry.channel_health` view provides the current health dashboard
/// - Survives service restarts
/// - Queryable for historical analysis
///
/// **In-Memory (performance):**
/// - Cache of latest readings to avoid DB queries on every check
/// - Quick staleness checks without hitting the database
/// - Supplies the previous-sample timestamp for live volume integration
/// - Refreshed from DB on service startup, updated on each poll
///
/// **Flow:**
/// 1. Daemon drains the serial feed / CSV tail once per cycle
/// 2. New readings land in `telemetry.flow_readings`
/// 3. `telemetry.update_monitoring_state()` records the poll outcome
/// 4. The in-memory cache is updated in place
/// 5. Staleness checks use the cache (fall back to DB if needed)

use crate::model::{FlowReading, METRIC_FLOW};
use chrono::{DateTime, Utc};
use postgres::Client;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// In-Memory State Cache
// ---------------------------------------------------------------------------

/// Cached state for a single channel. Refreshed from database periodically.
#[derive(Debug, Clone)]
pub struct ChannelCache {
    pub channel_id: String,
    pub latest_reading_time: Option<DateTime<Utc>>,
    pub latest_flow_lps: Option<f64>,
    pub staleness_threshold_seconds: i64,
    pub status: ChannelStatus,
    pub last_poll_attempted: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelStatus {
    Active,
    Degraded, // Stale data but channel exists
    Offline,  // No data available
    Unknown,
}

impl ChannelStatus {
    fn from_str(s: &str) -> Self {
        match s {
            "active" => ChannelStatus::Active,
            "degraded" => ChannelStatus::Degraded,
            "offline" => ChannelStatus::Offline,
            _ => ChannelStatus::Unknown,
        }
    }
}

/// In-memory cache of channel states, keyed by channel id.
pub struct MonitoringCache {
    cache: HashMap<String, ChannelCache>,
    last_refresh: DateTime<Utc>,
}

impl MonitoringCache {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
            last_refresh: Utc::now(),
        }
    }

    /// Load cache from database on startup or refresh.
    pub fn refresh_from_db(&mut self, client: &mut Client) -> Result<(), Box<dyn std::error::Error>> {
        let rows = client.query(
            "SELECT channel_id, latest_reading_time, latest_flow_lps, \
                    staleness_threshold_seconds, status, last_poll_attempted \
             FROM telemetry.monitoring_state",
            &[],
        )?;

        self.cache.clear();

        for row in rows {
            let channel_id: String = row.get(0);
            let latest_reading_time: Option<DateTime<Utc>> = row.get(1);
            let latest_flow_lps: Option<f64> = row.get::<_, Option<f64>>(2);
            let staleness_threshold_seconds: i64 = row.get::<_, i32>(3) as i64;
            let status_str: String = row.get(4);
            let last_poll_attempted: Option<DateTime<Utc>> = row.get(5);

            let cache_entry = ChannelCache {
                channel_id: channel_id.clone(),
                latest_reading_time,
                latest_flow_lps,
                staleness_threshold_seconds,
                status: ChannelStatus::from_str(&status_str),
                last_poll_attempted,
            };

            self.cache.insert(channel_id, cache_entry);
        }

        self.last_refresh = Utc::now();
        Ok(())
    }

    /// Get cached channel state (fast path).
    pub fn get(&self, channel_id: &str) -> Option<&ChannelCache> {
        self.cache.get(channel_id)
    }

    /// When the channel last reported, from cache.
    pub fn latest_time(&self, channel_id: &str) -> Option<DateTime<Utc>> {
        self.get(channel_id).and_then(|c| c.latest_reading_time)
    }

    /// Check if data is stale using the cached threshold.
    pub fn is_stale(&self, channel_id: &str, now: DateTime<Utc>) -> bool {
        if let Some(cached) = self.get(channel_id) {
            if let Some(reading_time) = cached.latest_reading_time {
                let age_seconds = (now - reading_time).num_seconds();
                return age_seconds > cached.staleness_threshold_seconds;
            }
        }
        true // Unknown channels are stale by default
    }

    /// Record a fresh reading in the cache without a DB round-trip. The
    /// daemon calls this as it warehouses, so the next cycle's volume
    /// integration sees the right previous timestamp.
    pub fn note_reading(
        &mut self,
        channel_id: &str,
        reading_time: DateTime<Utc>,
        flow_lps: f64,
        staleness_threshold_seconds: i64,
    ) {
        let entry = self
            .cache
            .entry(channel_id.to_string())
            .or_insert_with(|| ChannelCache {
                channel_id: channel_id.to_string(),
                latest_reading_time: None,
                latest_flow_lps: None,
                staleness_threshold_seconds,
                status: ChannelStatus::Active,
                last_poll_attempted: None,
            });

        if entry.latest_reading_time.map_or(true, |t| reading_time > t) {
            entry.latest_reading_time = Some(reading_time);
            entry.latest_flow_lps = Some(flow_lps);
            entry.status = ChannelStatus::Active;
        }
        entry.last_poll_attempted = Some(Utc::now());
    }

    /// Get all offline or degraded channels.
    pub fn unhealthy_channels(&self) -> Vec<&ChannelCache> {
        self.cache
            .values()
            .filter(|c| c.status == ChannelStatus::Offline || c.status == ChannelStatus::Degraded)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Database Operations
// ---------------------------------------------------------------------------

/// Record a polling attempt in the database and update state.
pub fn record_poll_result(
    client: &mut Client,
    channel_id: &str,
    success: bool,
    readings: &[FlowReading],
) -> Result<(), Box<dyn std::error::Error>> {
    // Find latest flow reading for this channel
    let latest = readings
        .iter()
        .filter(|r| r.channel_id == channel_id && r.metric_code == METRIC_FLOW)
        .max_by_key(|r| &r.datetime);

    let (latest_time, latest_value) = if let Some(reading) = latest {
        let dt = chrono::DateTime::parse_from_rfc3339(&reading.datetime)
            .map(|dt| dt.with_timezone(&Utc))
            .ok();
        (dt, Some(reading.value))
    } else {
        (None, None)
    };

    // Call database function to update state
    client.execute(
        "SELECT telemetry.update_monitoring_state($1, $2, $3, $4, $5)",
        &[
            &channel_id,
            &success,
            &(readings.len() as i32),
            &latest_time,
            &latest_value,
        ],
    )?;

    Ok(())
}

/// Get current health status from database (bypass cache).
pub fn get_channel_health(
    client: &mut Client,
) -> Result<Vec<ChannelHealthRow>, Box<dyn std::error::Error>> {
    let rows = client.query("SELECT * FROM telemetry.channel_health", &[])?;

    let mut results = Vec::new();
    for row in rows {
        results.push(ChannelHealthRow {
            channel_id: row.get(0),
            channel_label: row.get(1),
            status: row.get(2),
            is_stale: row.get(3),
            latest_reading_time: row.get(4),
            latest_flow_lps: row.get::<_, Option<f64>>(5),
            age_seconds: row.get::<_, Option<f64>>(6),
            staleness_threshold_seconds: row.get(7),
            last_poll_attempted: row.get(8),
            last_poll_succeeded: row.get(9),
            consecutive_failures: row.get(10),
        });
    }

    Ok(results)
}

#[derive(Debug)]
pub struct ChannelHealthRow {
    pub channel_id: String,
    pub channel_label: String,
    pub status: String,
    pub is_stale: Option<bool>,
    pub latest_reading_time: Option<DateTime<Utc>>,
    pub latest_flow_lps: Option<f64>,
    pub age_seconds: Option<f64>,
    pub staleness_threshold_seconds: i32,
    pub last_poll_attempted: Option<DateTime<Utc>>,
    pub last_poll_succeeded: Option<DateTime<Utc>>,
    pub consecutive_failures: i32,
}
