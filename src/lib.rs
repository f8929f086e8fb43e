/// aquamon_service: household water consumption monitoring and leak
/// detection service.
///
/// # Module structure
///
/// ```text
/// aquamon_service
/// ├── model       — shared data types (FlowReading, LeakThresholds, IngestError, …)
/// ├── config      — channel registry configuration loader (meters.toml)
/// ├── channels    — validated channel registry with role/lookup helpers
/// ├── db          — PostgreSQL connectivity and schema validation
/// ├── daemon      — main daemon loop (startup, backfill, sampling, warehousing)
/// ├── endpoint    — HTTP API for channel data, summary cards, and forecast
/// ├── ingest
/// │   ├── serial  — ESP32 main-meter line protocol over USB serial
/// │   ├── csvlog  — multi-channel CSV log parsing (tail + backfill)
/// │   └── fixtures (test only) — representative payloads for both formats
/// ├── monitor     — real-time staleness tracking (hybrid DB + in-memory)
/// ├── alert
/// │   ├── thresholds — balance differential severity evaluation
/// │   └── staleness  — channel reading freshness checking
/// └── analysis
///     ├── groupings   — organizes flat readings into per-channel structs
///     ├── balance     — main-vs-branches balance series + volume integration
///     ├── leak_events — leak event window extraction and persistence
///     ├── usage       — period aggregation and cost estimation
///     └── forecast    — consumption prediction (regression / moving average)
/// ```

/// Public modules
pub mod alert;
pub mod analysis;
pub mod channels;
pub mod config;
pub mod daemon;
pub mod db;
pub mod endpoint;
pub mod ingest;
pub mod model;
pub mod monitor;
