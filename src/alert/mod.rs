/// Alerting layer for the water monitoring service.
///
/// Submodules:
/// - `thresholds` — balance differential severity evaluation.
/// - `staleness`  — channel reading freshness checking.

pub mod staleness;
pub mod thresholds;
