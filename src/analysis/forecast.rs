/// Consumption forecasting over daily volume series.
///
/// Two deliberately small models, matching the data a household meter
/// actually produces:
///
/// - Ordinary least-squares regression over (day index, litres) — the
///   default once at least three days of history exist.
/// - Trailing moving average — the fallback for short histories, and the
///   baseline the trend check compares against.
///
/// Forecasts are clamped at zero; a falling trend never predicts the
/// meter running backwards.

use serde::{Deserialize, Serialize};

/// Days in the trailing window the moving-average model considers.
pub const MOVING_AVERAGE_WINDOW: usize = 7;

/// Minimum history length before regression is trusted over the average.
pub const REGRESSION_MIN_DAYS: usize = 3;

/// Relative slope (fraction of the mean, per day) beyond which the trend
/// is worth telling the user about.
pub const TREND_NOTE_THRESHOLD: f64 = 0.05;

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForecastMethod {
    LinearRegression,
    MovingAverage,
}

impl ForecastMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastMethod::LinearRegression => "linear_regression",
            ForecastMethod::MovingAverage => "moving_average",
        }
    }
}

/// Predicted consumption for the day after the series ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyForecast {
    pub next_day_l: f64,
    pub method: ForecastMethod,
}

/// Mean of the trailing `window` values. `None` on an empty series.
pub fn moving_average(values: &[f64], window: usize) -> Option<f64> {
    if values.is_empty() || window == 0 {
        return None;
    }
    let tail = &values[values.len().saturating_sub(window)..];
    Some(tail.iter().sum::<f64>() / tail.len() as f64)
}

/// Least-squares fit of `values` against their indices 0..n.
/// Returns `(slope, intercept)`; `None` when fewer than two points exist.
pub fn linear_regression(values: &[f64]) -> Option<(f64, f64)> {
    let n = values.len();
    if n < 2 {
        return None;
    }

    let n_f = n as f64;
    let x_mean = (n_f - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n_f;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }

    if sxx == 0.0 {
        return None;
    }

    let slope = sxy / sxx;
    Some((slope, y_mean - slope * x_mean))
}

/// Predicts the next day's consumption from daily history (litres,
/// oldest first). Regression once enough history exists, moving average
/// for short series, `None` with no data at all.
pub fn forecast_next_day(history: &[f64]) -> Option<DailyForecast> {
    if history.len() >= REGRESSION_MIN_DAYS {
        if let Some((slope, intercept)) = linear_regression(history) {
            let predicted = slope * history.len() as f64 + intercept;
            return Some(DailyForecast {
                next_day_l: predicted.max(0.0),
                method: ForecastMethod::LinearRegression,
            });
        }
    }

    moving_average(history, MOVING_AVERAGE_WINDOW).map(|avg| DailyForecast {
        next_day_l: avg.max(0.0),
        method: ForecastMethod::MovingAverage,
    })
}

/// Projects `days` of future consumption. The regression extrapolates;
/// the moving-average fallback repeats its value.
pub fn forecast_horizon(history: &[f64], days: usize) -> Vec<f64> {
    if history.len() >= REGRESSION_MIN_DAYS {
        if let Some((slope, intercept)) = linear_regression(history) {
            return (0..days)
                .map(|d| (slope * (history.len() + d) as f64 + intercept).max(0.0))
                .collect();
        }
    }

    match moving_average(history, MOVING_AVERAGE_WINDOW) {
        Some(avg) => vec![avg.max(0.0); days],
        None => Vec::new(),
    }
}

/// Estimated cost of the next 30 days at the given tariff, `None` with
/// no history.
pub fn project_monthly_cost(history: &[f64], tariff_per_m3: f64) -> Option<f64> {
    let horizon = forecast_horizon(history, 30);
    if horizon.is_empty() {
        return None;
    }
    let litres: f64 = horizon.iter().sum();
    Some((litres / 1000.0) * tariff_per_m3)
}

// ---------------------------------------------------------------------------
// Recommendations
// ---------------------------------------------------------------------------

/// Plain-language note when daily consumption is trending meaningfully up
/// or down. `None` when the trend is flat, the series is short, or the
/// house barely uses water.
pub fn trend_recommendation(history: &[f64]) -> Option<String> {
    if history.len() < REGRESSION_MIN_DAYS {
        return None;
    }
    let (slope, _) = linear_regression(history)?;
    let mean = history.iter().sum::<f64>() / history.len() as f64;
    if mean <= 0.0 {
        return None;
    }

    let relative = slope / mean;
    if relative > TREND_NOTE_THRESHOLD {
        Some(format!(
            "Consumption is rising ~{:.0}% per day over the last {} days; check for open taps or a new leak.",
            relative * 100.0,
            history.len()
        ))
    } else if relative < -TREND_NOTE_THRESHOLD {
        Some(format!(
            "Consumption is falling ~{:.0}% per day over the last {} days.",
            relative.abs() * 100.0,
            history.len()
        ))
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
