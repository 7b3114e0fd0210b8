//! Configuration management
//!
//! Handles loading and parsing of the JSON configuration file with environment
//! variable overrides for API credentials.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::broker::{alpaca, tradier, ClientConfig};
use crate::indicators::{DEFAULT_FAST_PERIOD, DEFAULT_SLOW_PERIOD};
use crate::store::StateBackend;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub price_feed: PriceFeedConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub state: StateConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load API credentials from environment when set
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("ALPACA_API_KEY") {
            self.price_feed.api_key = key;
        }
        if let Ok(secret) = std::env::var("ALPACA_SECRET_KEY") {
            self.price_feed.api_secret = secret;
        }
        if let Ok(token) = std::env::var("TRADIER_ACCESS_TOKEN") {
            self.broker.access_token = token;
        }
        if let Ok(account) = std::env::var("TRADIER_ACCOUNT_ID") {
            self.broker.account_id = account;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.strategy;

        if s.symbol.trim().is_empty() {
            bail!("strategy.symbol must not be empty");
        }
        if s.fast_period == 0 || s.slow_period == 0 {
            bail!("EMA periods must be positive");
        }
        if s.fast_period >= s.slow_period {
            bail!(
                "strategy.fast_period ({}) must be less than strategy.slow_period ({})",
                s.fast_period,
                s.slow_period
            );
        }
        if s.holding_threshold_hours.is_nan() || s.holding_threshold_hours <= 0.0 {
            bail!("strategy.holding_threshold_hours must be positive");
        }
        if s.poll_interval_secs == 0 {
            bail!("strategy.poll_interval_secs must be positive");
        }
        if s.bar_limit == 0 {
            bail!("strategy.bar_limit must be positive");
        }
        if s.order_quantity == 0 {
            bail!("strategy.order_quantity must be positive");
        }
        if self.price_feed.lookback_days < 1 {
            bail!(
                "price_feed.lookback_days must be at least 1 (got {})",
                self.price_feed.lookback_days
            );
        }

        Ok(())
    }
}

/// Signal and position-lifecycle parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub symbol: String,
    pub fast_period: usize,
    pub slow_period: usize,
    pub holding_threshold_hours: f64,
    pub poll_interval_secs: u64,
    pub bar_timeframe: String,
    pub bar_limit: usize,
    pub order_quantity: u32,
    /// Send a real sell_to_close when a position ages out
    pub submit_close_orders: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig {
            symbol: "SOFI".to_string(),
            fast_period: DEFAULT_FAST_PERIOD,
            slow_period: DEFAULT_SLOW_PERIOD,
            holding_threshold_hours: 4.0,
            poll_interval_secs: 300,
            bar_timeframe: "5Min".to_string(),
            bar_limit: 100,
            order_quantity: 1,
            submit_close_orders: false,
        }
    }
}

impl StrategyConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Alpaca market data settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceFeedConfig {
    pub base_url: String,
    pub feed: String,
    pub lookback_days: i64,
    #[serde(skip_serializing)]
    pub api_key: String,
    #[serde(skip_serializing)]
    pub api_secret: String,
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        PriceFeedConfig {
            base_url: alpaca::DEFAULT_DATA_URL.to_string(),
            feed: "iex".to_string(),
            lookback_days: 5,
            api_key: String::new(),
            api_secret: String::new(),
        }
    }
}

/// Tradier brokerage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub base_url: String,
    pub account_id: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            base_url: tradier::SANDBOX_URL.to_string(),
            account_id: String::new(),
            access_token: String::new(),
            max_retries: 3,
            timeout_secs: 30,
        }
    }
}

impl BrokerConfig {
    /// HTTP settings shared by both REST adapters
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::default()
            .with_max_retries(self.max_retries)
            .with_timeout(Duration::from_secs(self.timeout_secs))
    }
}

/// Where positions and the trade log live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub dir: PathBuf,
    pub backend: StateBackend,
    pub trade_log: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        StateConfig {
            dir: PathBuf::from("state"),
            backend: StateBackend::Json,
            trade_log: PathBuf::from("state/trade_log.csv"),
        }
    }
}
