/// Engine configuration, loaded from TOML with environment override for the
/// broker credential (spec §6).
use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, TradingError};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Broker bearer credential. Never stored in the TOML file; read from
    /// `BROKER_BEARER_TOKEN` at load time. Authentication/refresh itself is
    /// an external collaborator's concern.
    #[serde(default, skip_deserializing)]
    pub broker_bearer_token: String,

    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,

    #[serde(default = "default_timeframe_minutes")]
    pub timeframe_minutes: i64,

    #[serde(default = "default_strike_step")]
    pub strike_step: f64,

    #[serde(default = "default_pcr_range")]
    pub pcr_range: f64,

    #[serde(default = "default_cooldown_sec")]
    pub signal_cooldown_sec: i64,

    #[serde(default = "default_daily_loss_limit_pct")]
    pub daily_loss_limit_pct: f64,

    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: usize,

    #[serde(default = "default_risk_per_trade_pct")]
    pub risk_per_trade_pct: f64,

    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,

    #[serde(default = "default_target_pct")]
    pub target_pct: f64,

    #[serde(default = "default_trailing_activation_pct")]
    pub trailing_activation_pct: f64,

    #[serde(default = "default_trailing_lock_fraction")]
    pub trailing_lock_fraction: f64,

    #[serde(default = "default_trail_offset")]
    pub trail_offset: f64,

    #[serde(default = "default_square_off_window_min")]
    pub square_off_window_min: i64,

    #[serde(default = "default_warmup_min")]
    pub entry_warmup_min: i64,

    #[serde(default = "default_paper_slippage_pct")]
    pub paper_slippage_pct: f64,

    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,

    #[serde(default = "default_instrument_master_url")]
    pub instrument_master_url: String,

    #[serde(default = "default_feed_ws_url")]
    pub feed_ws_url: String,

    #[serde(default = "default_order_submit_url")]
    pub order_submit_url: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_order_rate_limit_per_sec")]
    pub order_rate_limit_per_sec: u32,

    #[serde(default = "default_registry_rate_limit_per_sec")]
    pub registry_rate_limit_per_sec: u32,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_risk_free_rate() -> f64 {
    0.06
}
fn default_timeframe_minutes() -> i64 {
    5
}
fn default_strike_step() -> f64 {
    50.0
}
fn default_pcr_range() -> f64 {
    500.0
}
fn default_cooldown_sec() -> i64 {
    120
}
fn default_daily_loss_limit_pct() -> f64 {
    5.0
}
fn default_max_concurrent_positions() -> usize {
    3
}
fn default_risk_per_trade_pct() -> f64 {
    2.0
}
fn default_stop_loss_pct() -> f64 {
    0.30
}
fn default_target_pct() -> f64 {
    0.60
}
fn default_trailing_activation_pct() -> f64 {
    20.0
}
fn default_trailing_lock_fraction() -> f64 {
    0.5
}
fn default_trail_offset() -> f64 {
    10.0
}
fn default_square_off_window_min() -> i64 {
    10
}
fn default_warmup_min() -> i64 {
    15
}
fn default_paper_slippage_pct() -> f64 {
    0.001
}
fn default_initial_capital() -> f64 {
    1_000_000.0
}
fn default_instrument_master_url() -> String {
    "https://example.invalid/instruments.csv.gz".to_string()
}
fn default_feed_ws_url() -> String {
    "wss://example.invalid/feed".to_string()
}
fn default_order_submit_url() -> String {
    "https://example.invalid/orders".to_string()
}
fn default_data_dir() -> String {
    "data".to_string()
}
fn default_order_rate_limit_per_sec() -> u32 {
    10
}
fn default_registry_rate_limit_per_sec() -> u32 {
    1
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str("").expect("empty config must satisfy all defaults")
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| TradingError::ConfigError(format!("failed to read config file: {e}")))?;

    let mut config: Config = toml::from_str(&content)
        .map_err(|e| TradingError::ConfigError(format!("failed to parse config: {e}")))?;

    config.broker_bearer_token = std::env::var("BROKER_BEARER_TOKEN").unwrap_or_default();

    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<()> {
    if config.risk_free_rate < 0.0 || config.risk_free_rate > 1.0 {
        return Err(TradingError::ConfigError(format!(
            "invalid risk_free_rate: {}",
            config.risk_free_rate
        )));
    }
    if config.timeframe_minutes <= 0 {
        return Err(TradingError::ConfigError(
            "timeframe_minutes must be positive".to_string(),
        ));
    }
    if config.strike_step <= 0.0 {
        return Err(TradingError::ConfigError(
            "strike_step must be positive".to_string(),
        ));
    }
    if config.daily_loss_limit_pct <= 0.0 {
        return Err(TradingError::ConfigError(format!(
            "invalid daily_loss_limit_pct: {}",
            config.daily_loss_limit_pct
        )));
    }
    if config.max_concurrent_positions == 0 {
        return Err(TradingError::ConfigError(
            "max_concurrent_positions must be >= 1".to_string(),
        ));
    }
    if config.stop_loss_pct <= 0.0 || config.stop_loss_pct >= 1.0 {
        return Err(TradingError::ConfigError(format!(
            "invalid stop_loss_pct: {}",
            config.stop_loss_pct
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_environment_section() {
        let config = Config::default();
        assert_eq!(config.risk_free_rate, 0.06);
        assert_eq!(config.timeframe_minutes, 5);
        assert_eq!(config.strike_step, 50.0);
        assert_eq!(config.pcr_range, 500.0);
        assert_eq!(config.signal_cooldown_sec, 120);
    }

    #[test]
    fn rejects_zero_max_concurrent_positions() {
        let mut config = Config::default();
        config.max_concurrent_positions = 0;
        assert!(validate_config(&config).is_err());
    }
}
