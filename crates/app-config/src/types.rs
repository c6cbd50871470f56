// In crates/app-config/src/types.rs

use crate::{Error, Result};
use core_types::MarginType;
use risk::types::RiskSettings;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct Settings {
    /// The application's general settings.
    pub app: AppSettings,
    /// Settings for the Binance API.
    pub binance: BinanceSettings,
    /// Settings for the database connection.
    pub database: DatabaseSettings,
    /// What to trade and how often.
    pub trading: TradingSettings,
    /// Account gates, per-position rules and exit validation.
    #[serde(default)]
    pub risk: RiskSettings,
    /// Paper exchange parameters, used when `app.paper_trading` is set.
    #[serde(default)]
    pub simulation: SimulationSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.trading.validate()?;
        self.risk.validate()?;
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppSettings {
    /// The environment the application is running in (e.g., "development", "production").
    pub environment: String,
    /// The log level for the application.
    pub log_level: String,
    /// Route orders to the simulated exchange instead of Binance.
    #[serde(default = "default_true")]
    pub paper_trading: bool,
}

#[derive(Deserialize, Debug, Clone)]
pub struct BinanceSettings {
    /// The API key for Binance.
    pub api_key: String,
    /// The secret key for Binance.
    pub secret_key: String,
    /// The REST API base URL for Binance Futures.
    pub rest_base_url: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DatabaseSettings {
    /// The connection URL for the SQLite database (e.g., `sqlite://data/trader.db`).
    pub url: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TradingSettings {
    pub symbols: Vec<String>,
    #[serde(default = "default_kline_interval")]
    pub kline_interval: String,
    #[serde(default = "default_kline_limit")]
    pub kline_limit: u16,
    /// The cycle fires every N minutes on the wall clock.
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_minutes: u32,
    /// Period of the background position poller.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_min_leverage")]
    pub min_leverage: u32,
    #[serde(default = "default_max_leverage")]
    pub max_leverage: u32,
    /// Smallest order value, in quote currency, the engine will send.
    #[serde(default = "default_min_notional")]
    pub min_notional: f64,
    #[serde(default)]
    pub margin_type: MarginType,
    /// Baseline for return and drawdown. Falls back to the first stored snapshot.
    #[serde(default)]
    pub initial_balance: Option<f64>,
    /// How many recent trades and orders the decision step sees.
    #[serde(default = "default_recent_limit")]
    pub recent_history_limit: u32,
    #[serde(default)]
    pub system_instruction: String,
}

impl TradingSettings {
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            return Err(Error::Invalid("trading.symbols must not be empty".into()));
        }
        if self.cycle_interval_minutes == 0 || self.cycle_interval_minutes > 60 * 24 {
            return Err(Error::Invalid(format!(
                "trading.cycle_interval_minutes must be within 1..=1440, got {}",
                self.cycle_interval_minutes
            )));
        }
        if self.min_leverage == 0 || self.min_leverage > self.max_leverage {
            return Err(Error::Invalid(format!(
                "leverage bounds are inverted or zero: {}..={}",
                self.min_leverage, self.max_leverage
            )));
        }
        if self.min_notional < 0.0 {
            return Err(Error::Invalid("trading.min_notional must not be negative".into()));
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct SimulationSettings {
    #[serde(default = "default_sim_balance")]
    pub initial_balance: f64,
    /// Taker fee rate (e.g., 0.0004 for 0.04%).
    #[serde(default = "default_taker_fee")]
    pub taker_fee_rate: f64,
    #[serde(default = "default_step_size")]
    pub step_size: f64,
    #[serde(default = "default_tick_size")]
    pub tick_size: f64,
    #[serde(default = "default_step_size")]
    pub min_qty: f64,
    #[serde(default = "default_min_notional")]
    pub min_notional: f64,
    /// Starting mark prices, keyed by symbol.
    #[serde(default)]
    pub mark_prices: std::collections::HashMap<String, f64>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            initial_balance: default_sim_balance(),
            taker_fee_rate: default_taker_fee(),
            step_size: default_step_size(),
            tick_size: default_tick_size(),
            min_qty: default_step_size(),
            min_notional: default_min_notional(),
            mark_prices: Default::default(),
        }
    }
}

/// Helper functions for serde defaults
fn default_true() -> bool { true }
fn default_kline_interval() -> String { "3m".into() }
fn default_kline_limit() -> u16 { 100 }
fn default_cycle_interval() -> u32 { 3 }
fn default_sync_interval() -> u64 { 10 }
fn default_min_leverage() -> u32 { 1 }
fn default_max_leverage() -> u32 { 20 }
fn default_min_notional() -> f64 { 5.0 }
fn default_recent_limit() -> u32 { 10 }
fn default_sim_balance() -> f64 { 10_000.0 }
fn default_taker_fee() -> f64 { 0.0004 }
fn default_step_size() -> f64 { 0.001 }
fn default_tick_size() -> f64 { 0.1 }

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
        [app]
        environment = "test"
        log_level = "info"

        [binance]
        api_key = ""
        secret_key = ""
        rest_base_url = "https://testnet.binancefuture.com"

        [database]
        url = "sqlite::memory:"

        [trading]
        symbols = ["BTCUSDT", "ETHUSDT"]
    "#;

    #[test]
    fn defaults_fill_missing_sections() {
        let settings: Settings = toml::from_str(BASE).unwrap();
        assert!(settings.app.paper_trading);
        assert_eq!(settings.trading.cycle_interval_minutes, 3);
        assert_eq!(settings.trading.max_leverage, 20);
        assert_eq!(settings.trading.margin_type, MarginType::Isolated);
        assert_eq!(settings.risk.max_drawdown_percent, 20.0);
        assert_eq!(settings.risk.rules.max_holding_hours, 36.0);
        settings.validate().unwrap();
    }

    #[test]
    fn inverted_leverage_bounds_are_rejected() {
        let mut settings: Settings = toml::from_str(BASE).unwrap();
        settings.trading.min_leverage = 10;
        settings.trading.max_leverage = 5;
        assert!(settings.validate().is_err());
    }
}
