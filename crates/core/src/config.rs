use crate::types::Granularity;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root application configuration. Loaded from environment variables
/// with the prefix `GYM_KPI__` and an optional TOML config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    /// Trailing buckets kept for chart display. `0` keeps the full series.
    #[serde(default = "default_series_window")]
    pub series_window: usize,
    /// Payments above this multiple of the period mean count as personal training.
    #[serde(default = "default_pt_threshold_multiplier")]
    pub pt_threshold_multiplier: f64,
    /// Months after a membership ends during which a completed payment counts as a renewal.
    #[serde(default = "default_renewal_window_months")]
    pub renewal_window_months: u32,
    /// Renewal rate reported when no membership expired in the period.
    #[serde(default = "default_renewal_placeholder_percent")]
    pub renewal_placeholder_percent: f64,
    #[serde(default = "default_granularity")]
    pub default_granularity: Granularity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Storage key of the persisted KPI card configuration.
    #[serde(default = "default_cards_key")]
    pub cards_key: String,
}

// Default functions
fn default_series_window() -> usize {
    7
}
fn default_pt_threshold_multiplier() -> f64 {
    1.5
}
fn default_renewal_window_months() -> u32 {
    2
}
fn default_renewal_placeholder_percent() -> f64 {
    0.0
}
fn default_granularity() -> Granularity {
    Granularity::Month
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_config_dir() -> PathBuf {
    PathBuf::from("./config")
}
fn default_fetch_timeout_ms() -> u64 {
    10_000
}
fn default_cards_key() -> String {
    "gym.kpi.cards".to_string()
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            series_window: default_series_window(),
            pt_threshold_multiplier: default_pt_threshold_multiplier(),
            renewal_window_months: default_renewal_window_months(),
            renewal_placeholder_percent: default_renewal_placeholder_percent(),
            default_granularity: default_granularity(),
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            config_dir: default_config_dir(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            cards_key: default_cards_key(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional TOML file, overridden by environment variables.
    pub fn load_from(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("GYM_KPI")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
