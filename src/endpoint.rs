/// HTTP endpoint for querying channel data
///
/// Provides a simple REST API for external tools (dashboards, scripts)
/// to query the current state of the monitored channels.
///
/// Endpoints:
/// - GET /channel/{channel_id} - Returns all relational data for a channel
/// - GET /summary - Consumption cards, forecast, and recommendation
/// - GET /health - Service health check

use crate::analysis::forecast;
use crate::analysis::groupings;
use crate::analysis::usage::{self, ConsumptionCards, Period};
use crate::channels::ChannelRegistry;
use crate::model::FlowReading;
use chrono::{DateTime, Utc};
use postgres::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Complete channel data response including readings, state, and metadata
#[derive(Debug, Serialize, Deserialize)]
pub struct ChannelDataResponse {
    /// Channel metadata
    pub channel_id: String,
    pub label: String,
    pub description: String,
    pub role: String,
    pub x: f64,
    pub y: f64,

    /// Current readings
    pub flow: Option<ReadingData>,
    pub pulses: Option<ReadingData>,

    /// Consumption since midnight
    pub today_volume_l: f64,

    /// Monitoring state
    pub monitoring_state: Option<MonitoringStateData>,

    /// Data freshness
    pub last_updated: Option<DateTime<Utc>>,
    pub staleness_seconds: Option<i64>,
}

/// Simplified reading data for JSON response
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadingData {
    pub value: f64,
    pub unit: String,
    pub datetime: String,
    pub quality: String,
}

/// Monitoring state for JSON response
#[derive(Debug, Serialize, Deserialize)]
pub struct MonitoringStateData {
    pub status: String,
    pub last_poll_attempted: Option<DateTime<Utc>>,
    pub last_poll_succeeded: Option<DateTime<Utc>>,
    pub consecutive_failures: i32,
    pub is_stale: bool,
}

/// Whole-house summary: the cards plus the forecast layer.
#[derive(Debug, Serialize, Deserialize)]
pub struct SummaryResponse {
    #[serde(flatten)]
    pub cards: ConsumptionCards,
    pub forecast_next_day_l: Option<f64>,
    pub forecast_method: Option<String>,
    pub recommendation: Option<String>,
    pub channel_count: usize,
}

// ---------------------------------------------------------------------------
// Data Fetching
// ---------------------------------------------------------------------------

/// Fetch all relational data for a channel from the database
pub fn fetch_channel_data(
    client: &mut Client,
    registry: &ChannelRegistry,
    channel_id: &str,
) -> Result<ChannelDataResponse, String> {
    // Get channel metadata from registry
    let channel = registry
        .find(channel_id)
        .ok_or_else(|| format!("Channel {} not found in registry", channel_id))?;

    // Fetch latest readings from database
    let readings = fetch_latest_readings(client, registry, channel_id)?;

    // Group readings by metric
    let grouped = groupings::group_by_channel(readings);
    let channel_readings = grouped.get(channel_id);

    // Extract flow and pulses
    let flow = channel_readings
        .and_then(|cr| cr.flow_lps.as_ref())
        .map(reading_to_data);

    let pulses = channel_readings
        .and_then(|cr| cr.pulses.as_ref())
        .map(reading_to_data);

    // Consumption since midnight
    let today_volume_l =
        usage::fetch_window_total(client, channel_id, Period::Day.truncate(Utc::now()))
            .map_err(|e| format!("Failed to fetch today's volume: {}", e))?;

    // Get monitoring state
    let monitoring_state = fetch_monitoring_state(client, channel_id)?;

    // Calculate staleness
    let last_updated = channel_readings.and_then(|cr| {
        cr.flow_lps
            .as_ref()
            .or(cr.pulses.as_ref())
            .and_then(|r| chrono::DateTime::parse_from_rfc3339(&r.datetime).ok())
            .map(|dt| dt.with_timezone(&Utc))
    });

    let staleness_seconds = last_updated.map(|dt| (Utc::now() - dt).num_seconds());

    Ok(ChannelDataResponse {
        channel_id: channel.channel_id.clone(),
        label: channel.label.clone(),
        description: channel.description.clone(),
        role: channel.role.clone(),
        x: channel.x,
        y: channel.y,
        flow,
        pulses,
        today_volume_l,
        monitoring_state,
        last_updated,
        staleness_seconds,
    })
}

/// Fetch latest readings per metric for a channel from the database
fn fetch_latest_readings(
    client: &mut Client,
    registry: &ChannelRegistry,
    channel_id: &str,
) -> Result<Vec<FlowReading>, String> {
    let rows = client
        .query(
            "SELECT DISTINCT ON (metric_code)
                channel_id,
                metric_code,
                unit,
                value,
                reading_time,
                quality
             FROM telemetry.flow_readings
             WHERE channel_id = $1
             ORDER BY metric_code, reading_time DESC",
            &[&channel_id],
        )
        .map_err(|e| format!("Database query failed: {}", e))?;

    let mut readings = Vec::new();

    for row in rows {
        let channel_id: String = row.get(0);
        let metric_code: String = row.get(1);
        let unit: String = row.get(2);
        let value: Decimal = row.get(3);
        let reading_time: DateTime<Utc> = row.get(4);
        let quality: String = row.get(5);

        // Find channel label from registry
        let channel_label = registry
            .find(&channel_id)
            .map(|c| c.label.clone())
            .unwrap_or_else(|| channel_id.clone());

        readings.push(FlowReading {
            channel_id,
            channel_label,
            metric_code,
            unit,
            value: value.to_string().parse().unwrap_or(0.0),
            datetime: reading_time.to_rfc3339(),
            quality,
        });
    }

    Ok(readings)
}

/// Fetch monitoring state for a channel
fn fetch_monitoring_state(
    client: &mut Client,
    channel_id: &str,
) -> Result<Option<MonitoringStateData>, String> {
    let rows = client
        .query(
            "SELECT status, last_poll_attempted, last_poll_succeeded, consecutive_failures, is_stale
             FROM telemetry.monitoring_state
             WHERE channel_id = $1",
            &[&channel_id],
        )
        .map_err(|e| format!("Failed to fetch monitoring state: {}", e))?;

    if rows.is_empty() {
        return Ok(None);
    }

    let row = &rows[0];
    Ok(Some(MonitoringStateData {
        status: row.get(0),
        last_poll_attempted: row.get(1),
        last_poll_succeeded: row.get(2),
        consecutive_failures: row.get(3),
        is_stale: row.get(4),
    }))
}

/// Build the whole-house summary from the main meter's warehouse rollup.
pub fn fetch_summary(
    client: &mut Client,
    registry: &ChannelRegistry,
    tariff_per_m3: f64,
) -> Result<SummaryResponse, String> {
    let main_id = &registry.main().channel_id;
    let now = Utc::now();

    let cards = usage::build_cards_from_db(client, main_id, now, tariff_per_m3)
        .map_err(|e| format!("Failed to build consumption cards: {}", e))?;

    let history: Vec<f64> = usage::fetch_daily_volumes(client, main_id, 30)
        .map_err(|e| format!("Failed to fetch daily volumes: {}", e))?
        .into_iter()
        .map(|(_, v)| v)
        .collect();

    let forecast = forecast::forecast_next_day(&history);
    let recommendation = forecast::trend_recommendation(&history);

    Ok(SummaryResponse {
        cards,
        forecast_next_day_l: forecast.as_ref().map(|f| f.next_day_l),
        forecast_method: forecast.map(|f| f.method.as_str().to_string()),
        recommendation,
        channel_count: registry.len(),
    })
}

/// Convert FlowReading to ReadingData
fn reading_to_data(reading: &FlowReading) -> ReadingData {
    ReadingData {
        value: reading.value,
        unit: reading.unit.clone(),
        datetime: reading.datetime.clone(),
        quality: reading.quality.clone(),
    }
}

// ---------------------------------------------------------------------------
// HTTP Server
// ---------------------------------------------------------------------------

/// Start HTTP endpoint server on the specified port
pub fn start_endpoint_server(
    port: u16,
    mut client: Client,
    registry: ChannelRegistry,
    tariff_per_m3: f64,
) -> Result<(), String> {
    let server = tiny_http::Server::http(format!("0.0.0.0:{}", port))
        .map_err(|e| format!("Failed to start HTTP server: {}", e))?;

    println!("📡 HTTP endpoint listening on http://0.0.0.0:{}", port);
    println!("   GET /channel/{{channel_id}} - Query channel data");
    println!("   GET /summary - Consumption cards and forecast");
    println!("   GET /health - Service health check\n");

    for request in server.incoming_requests() {
        let url = request.url();

        // Route requests
        let response = if url == "/health" {
            handle_health()
        } else if url == "/summary" {
            handle_summary(&mut client, &registry, tariff_per_m3)
        } else if url.starts_with("/channel/") {
            let channel_id = url.trim_start_matches("/channel/");
            handle_channel_query(&mut client, &registry, channel_id)
        } else {
            create_response(
                404,
                serde_json::json!({
                    "error": "Not found",
                    "available_endpoints": ["/health", "/summary", "/channel/{channel_id}"]
                }),
            )
        };

        if let Err(e) = request.respond(response) {
            eprintln!("Failed to send response: {}", e);
        }
    }

    Ok(())
}

/// Handle /health endpoint
fn handle_health() -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    create_response(
        200,
        serde_json::json!({
            "status": "ok",
            "service": "aquamon_service",
            "version": "0.1.0"
        }),
    )
}

/// Handle /channel/{channel_id} endpoint
fn handle_channel_query(
    client: &mut Client,
    registry: &ChannelRegistry,
    channel_id: &str,
) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    match fetch_channel_data(client, registry, channel_id) {
        Ok(data) => create_response(200, serde_json::to_value(&data).unwrap()),
        Err(e) => create_response(
            404,
            serde_json::json!({
                "error": e,
                "channel_id": channel_id
            }),
        ),
    }
}

/// Handle /summary endpoint
fn handle_summary(
    client: &mut Client,
    registry: &ChannelRegistry,
    tariff_per_m3: f64,
) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    match fetch_summary(client, registry, tariff_per_m3) {
        Ok(data) => create_response(200, serde_json::to_value(&data).unwrap()),
        Err(e) => create_response(500, serde_json::json!({ "error": e })),
    }
}

/// Create HTTP response with JSON body
fn create_response(
    status_code: u16,
    json: serde_json::Value,
) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    let body = serde_json::to_string_pretty(&json).unwrap();
    let bytes = body.into_bytes();

    tiny_http::Response::from_data(bytes)
        .with_status_code(tiny_http::StatusCode::from(status_code))
        .with_header(
            tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap(),
        )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::METRIC_FLOW;

    #[test]
    fn test_reading_to_data_conversion() {
        let reading = FlowReading {
            channel_id: "s1".to_string(),
            channel_label: "Banheiro".to_string(),
            metric_code: METRIC_FLOW.to_string(),
            unit: "L/s".to_string(),
            value: 0.08,
            datetime: "2025-11-10T08:00:00+00:00".to_string(),
            quality: "B".to_string(),
        };

        let data = reading_to_data(&reading);

        assert_eq!(data.value, 0.08);
        assert_eq!(data.unit, "L/s");
        assert_eq!(data.quality, "B");
    }

    #[test]
    fn test_summary_response_serializes_cards_inline() {
        let summary = SummaryResponse {
            cards: ConsumptionCards {
                today_l: 120.0,
                last_7_days_l: 800.0,
                last_30_days_l: 3400.0,
                month_cost_estimate: 15.3,
            },
            forecast_next_day_l: Some(115.0),
            forecast_method: Some("linear_regression".to_string()),
            recommendation: None,
            channel_count: 5,
        };

        let json = serde_json::to_value(&summary).unwrap();
        // Flattened: card fields sit at the top level for dashboard use.
        assert_eq!(json["today_l"], 120.0);
        assert_eq!(json["forecast_method"], "linear_regression");
        assert_eq!(json["channel_count"], 5);
    }
}
