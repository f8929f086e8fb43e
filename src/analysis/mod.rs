/// Analysis layer for the water monitoring service.
///
/// Submodules:
/// - `groupings`   — organizes flat ingest output into per-channel structures.
/// - `balance`     — time-aligned main-vs-branches balance series.
/// - `leak_events` — leak event window extraction and persistence.
/// - `usage`       — volume integration, period aggregation, cost estimation.
/// - `forecast`    — consumption prediction over daily volume series.

pub mod balance;
pub mod forecast;
pub mod groupings;
pub mod leak_events;
pub mod usage;
