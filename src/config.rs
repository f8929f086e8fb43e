/// Channel configuration loader - parses meters.toml
///
/// Separates sensor metadata from code, making it easy to move a sensor to
/// a different fixture, recalibrate a pulse factor, or adjust the balance
/// thresholds without recompiling the service.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

use crate::model::{LeakThresholds, YFS201_PULSES_PER_LITRE};

/// Channel metadata loaded from meters.toml configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub channel_id: String,
    pub label: String,
    pub description: String,

    /// "main" for the principal inflow meter, "branch" for everything else.
    pub role: String,

    /// Native wire unit: "lpm" (converted to L/s at ingest) or "lps".
    pub unit: String,

    // Floor-plan position, normalized to [0, 1]
    pub x: f64,
    pub y: f64,

    /// Physical ceiling for this sensor; readings above it are rejected.
    pub max_plausible_lps: f64,

    /// Pulses per litre for hall-effect meters. Only meaningful on the
    /// main channel; defaults to the YF-S201 factor when omitted.
    pub pulses_per_litre: Option<f64>,

    /// How old a reading may get before the channel counts as stale.
    pub staleness_threshold_seconds: Option<i64>,
}

impl ChannelConfig {
    pub fn is_main(&self) -> bool {
        self.role == "main"
    }

    pub fn pulse_factor(&self) -> f64 {
        self.pulses_per_litre.unwrap_or(YFS201_PULSES_PER_LITRE)
    }
}

/// Balance thresholds from the [balance] section
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceConfig {
    pub watch_lps: f64,
    pub alert_lps: f64,
    pub critical_lps: f64,
    /// Inter-sample gaps longer than this are clamped during volume
    /// integration so outages are not billed as consumption.
    pub max_gap_seconds: f64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            watch_lps: 0.05,
            alert_lps: 0.2,
            critical_lps: 0.6,
            max_gap_seconds: 120.0,
        }
    }
}

/// Billing parameters from the [billing] section
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Water tariff in R$ per cubic metre.
    pub tariff_per_m3: f64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self { tariff_per_m3: 4.50 }
    }
}

/// Root configuration structure for TOML parsing
#[derive(Debug, Deserialize)]
struct MeterRegistryFile {
    channel: Vec<ChannelConfig>,
    #[serde(default)]
    balance: Option<BalanceConfig>,
    #[serde(default)]
    billing: Option<BillingConfig>,
}

/// Fully parsed configuration: channels plus tuning sections.
#[derive(Debug, Clone)]
pub struct MeterConfig {
    pub channels: Vec<ChannelConfig>,
    pub balance: BalanceConfig,
    pub billing: BillingConfig,
}

/// Loads the meter registry from meters.toml.
///
/// # Panics
/// Panics if the configuration file is missing, malformed, or contains
/// invalid data. This is intentional — the service cannot operate without
/// valid channel metadata.
///
/// # File Location
/// Expects `meters.toml` in the current working directory (project root
/// when running via `cargo run`).
pub fn load_config() -> MeterConfig {
    let config_path = "meters.toml";

    let contents = fs::read_to_string(config_path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", config_path, e));

    parse_config(&contents, config_path)
}

/// Parses a meters.toml document. Split out of `load_config` so tests can
/// exercise validation without touching the filesystem.
pub fn parse_config(contents: &str, origin: &str) -> MeterConfig {
    let file: MeterRegistryFile = toml::from_str(contents)
        .unwrap_or_else(|e| panic!("Failed to parse {}: {}", origin, e));

    let config = MeterConfig {
        channels: file.channel,
        balance: file.balance.unwrap_or_default(),
        billing: file.billing.unwrap_or_default(),
    };

    validate(&config, origin);
    config
}

/// Rejects configurations the rest of the service cannot operate on.
fn validate(config: &MeterConfig, origin: &str) {
    if config.channels.is_empty() {
        panic!("{}: no channels configured", origin);
    }

    let mains = config.channels.iter().filter(|c| c.is_main()).count();
    if mains != 1 {
        panic!(
            "{}: expected exactly one channel with role = \"main\", found {}",
            origin, mains
        );
    }

    for channel in &config.channels {
        if channel.channel_id.is_empty() {
            panic!("{}: channel with empty channel_id", origin);
        }
        if channel.role != "main" && channel.role != "branch" {
            panic!(
                "{}: channel '{}' has unknown role '{}'",
                origin, channel.channel_id, channel.role
            );
        }
        if channel.unit != "lpm" && channel.unit != "lps" {
            panic!(
                "{}: channel '{}' has unknown unit '{}'",
                origin, channel.channel_id, channel.unit
            );
        }
        if channel.max_plausible_lps <= 0.0 {
            panic!(
                "{}: channel '{}' must have a positive max_plausible_lps",
                origin, channel.channel_id
            );
        }
    }

    let b = &config.balance;
    if !(b.watch_lps < b.alert_lps && b.alert_lps < b.critical_lps) {
        panic!(
            "{}: [balance] thresholds must be strictly ascending (watch < alert < critical)",
            origin
        );
    }
    if b.max_gap_seconds <= 0.0 {
        panic!("{}: [balance] max_gap_seconds must be positive", origin);
    }
    if config.billing.tariff_per_m3 < 0.0 {
        panic!("{}: [billing] tariff_per_m3 must not be negative", origin);
    }
}

/// Loads the registry and builds a lookup map keyed by channel id.
///
/// Useful for O(1) channel lookups during data processing.
pub fn load_config_map() -> HashMap<String, ChannelConfig> {
    load_config()
        .channels
        .into_iter()
        .map(|c| (c.channel_id.clone(), c))
        .collect()
}

/// Converts BalanceConfig from TOML to the LeakThresholds model type.
///
/// This adapter function bridges the configuration layer and the domain
/// model, allowing the rest of the codebase to use the LeakThresholds type.
impl From<&BalanceConfig> for LeakThresholds {
    fn from(config: &BalanceConfig) -> Self {
        LeakThresholds {
            watch_lps: config.watch_lps,
            alert_lps: config.alert_lps,
            critical_lps: config.critical_lps,
        }
    }
}
