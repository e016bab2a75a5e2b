//! Configuration management for the quoting bot.
//!
//! Loads settings from environment variables and config files.

use crate::oracle::OracleLimits;
use crate::strategy::{validate_params, PolicyError, PriceImprovementMode};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Trader identity, signing key and market accounts
    #[serde(default)]
    pub venue: VenueConfig,
    /// Quoting parameters submitted to the venue
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Loop cadence and lifecycle timing
    #[serde(default)]
    pub session: SessionConfig,
    /// Oracle validation limits
    #[serde(default)]
    pub oracle: OracleConfig,
    /// Market -> price feed registry
    #[serde(default = "default_feeds")]
    pub feeds: HashMap<String, FeedPairConfig>,
    /// Simulated venue used by the binary
    #[serde(default)]
    pub paper: PaperConfig,
    /// SQLite session journal
    #[serde(default)]
    pub journal: JournalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    /// Trader identity
    #[serde(default = "default_trader")]
    pub trader: String,
    /// Secret for signing requests
    #[serde(default)]
    pub signer_secret: String,
    /// Market to quote
    #[serde(default = "default_market")]
    pub market: String,
    /// Trader's base token account
    #[serde(default = "default_base_account")]
    pub base_account: String,
    /// Trader's quote token account
    #[serde(default = "default_quote_account")]
    pub quote_account: String,
}

/// Per-session strategy parameters. Immutable once a session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Distance from fair price in basis points (must be > 0)
    #[serde(default = "default_quote_edge_bps")]
    pub quote_edge_bps: u64,
    /// Notional per side in raw quote atoms
    #[serde(default = "default_quote_size_quote_atoms")]
    pub quote_size_quote_atoms: u64,
    /// Reject quotes that would cross the book instead of taking
    #[serde(default)]
    pub post_only: bool,
    #[serde(default = "default_price_improvement_mode")]
    pub price_improvement_mode: PriceImprovementMode,
    /// Minimum edge kept by Ubermensch, in basis points (<= quote_edge_bps)
    #[serde(default = "default_margin_bps")]
    pub margin_bps: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Number of quote refreshes before teardown
    #[serde(default = "default_tick_count")]
    pub tick_count: u32,
    /// Target period between tick starts
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Take a balance checkpoint every K ticks
    #[serde(default = "default_balance_report_every")]
    pub balance_report_every: u32,
    /// Wait after withdrawal before reading final balances
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Upper bound for each oracle/venue request
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Consecutive failed ticks before a health alert is emitted
    #[serde(default = "default_failure_alert_threshold")]
    pub failure_alert_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Oldest acceptable price publication, in seconds
    #[serde(default = "default_max_staleness_secs")]
    pub max_staleness_secs: i64,
    /// Maximum confidence / price ratio
    #[serde(default = "default_max_confidence_ratio")]
    pub max_confidence_ratio: Decimal,
}

/// Oracle feeds used to value one market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPairConfig {
    pub base_feed: String,
    pub quote_feed: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    #[serde(default = "default_base_decimals")]
    pub base_decimals: u32,
    #[serde(default = "default_quote_decimals")]
    pub quote_decimals: u32,
    #[serde(default = "default_tick_size")]
    pub tick_size: Decimal,
    /// External best bid/ask seeded into the simulated book
    #[serde(default = "default_paper_best_bid")]
    pub best_bid: Decimal,
    #[serde(default = "default_paper_best_ask")]
    pub best_ask: Decimal,
    /// USD prices published by the simulated oracle
    #[serde(default = "default_base_price_usd")]
    pub base_price_usd: Decimal,
    #[serde(default = "default_quote_price_usd")]
    pub quote_price_usd: Decimal,
    /// Starting token balances in raw atoms
    #[serde(default = "default_initial_base_atoms")]
    pub initial_base_atoms: u64,
    #[serde(default = "default_initial_quote_atoms")]
    pub initial_quote_atoms: u64,
    /// Simulated latency per venue request
    #[serde(default)]
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    #[serde(default = "default_journal_enabled")]
    pub enabled: bool,
    #[serde(default = "default_journal_path")]
    pub path: String,
}

// Default value functions
fn default_trader() -> String {
    "paper-trader".to_string()
}

fn default_market() -> String {
    "SOL-USDC".to_string()
}

fn default_base_account() -> String {
    "paper-trader-sol".to_string()
}

fn default_quote_account() -> String {
    "paper-trader-usdc".to_string()
}

fn default_quote_edge_bps() -> u64 {
    3
}

fn default_quote_size_quote_atoms() -> u64 {
    100_000 // 0.1 USDC at 6 decimals
}

fn default_price_improvement_mode() -> PriceImprovementMode {
    PriceImprovementMode::Ubermensch
}

fn default_margin_bps() -> u64 {
    3
}

fn default_tick_count() -> u32 {
    10
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_balance_report_every() -> u32 {
    10
}

fn default_settle_delay_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_failure_alert_threshold() -> u32 {
    5
}

fn default_max_staleness_secs() -> i64 {
    20 // ~50 slots
}

fn default_max_confidence_ratio() -> Decimal {
    Decimal::new(1, 1) // 0.1: reject when conf * 10 > price
}

fn default_feeds() -> HashMap<String, FeedPairConfig> {
    HashMap::from([(
        default_market(),
        FeedPairConfig {
            base_feed: "SOL/USD".to_string(),
            quote_feed: "USDC/USD".to_string(),
        },
    )])
}

fn default_base_decimals() -> u32 {
    9
}

fn default_quote_decimals() -> u32 {
    6
}

fn default_tick_size() -> Decimal {
    Decimal::new(1, 3) // 0.001
}

fn default_paper_best_bid() -> Decimal {
    Decimal::new(19_990, 3) // 19.990
}

fn default_paper_best_ask() -> Decimal {
    Decimal::new(20_010, 3) // 20.010
}

fn default_base_price_usd() -> Decimal {
    Decimal::new(20, 0)
}

fn default_quote_price_usd() -> Decimal {
    Decimal::ONE
}

fn default_initial_base_atoms() -> u64 {
    10_000_000_000 // 10 SOL
}

fn default_initial_quote_atoms() -> u64 {
    1_000_000_000 // 1000 USDC
}

fn default_journal_enabled() -> bool {
    true
}

fn default_journal_path() -> String {
    "data/sessions.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("UBERMM"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        self.strategy
            .validate()
            .context("invalid strategy configuration")?;

        anyhow::ensure!(
            self.session.tick_interval_ms > 0,
            "tick_interval_ms must be greater than 0"
        );

        anyhow::ensure!(
            self.session.balance_report_every > 0,
            "balance_report_every must be greater than 0"
        );

        anyhow::ensure!(
            self.session.request_timeout_ms > 0,
            "request_timeout_ms must be greater than 0"
        );

        anyhow::ensure!(
            self.oracle.max_confidence_ratio > Decimal::ZERO,
            "max_confidence_ratio must be positive"
        );

        anyhow::ensure!(
            self.feeds.contains_key(&self.venue.market),
            "no oracle feeds registered for market {}",
            self.venue.market
        );

        Ok(())
    }
}

impl StrategyConfig {
    /// Reject parameters the venue program would refuse.
    pub fn validate(&self) -> Result<(), PolicyError> {
        validate_params(
            self.price_improvement_mode,
            self.quote_edge_bps,
            self.margin_bps,
        )
    }
}

impl SessionConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl OracleConfig {
    pub fn max_staleness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_staleness_secs)
    }

    pub fn limits(&self) -> OracleLimits {
        OracleLimits {
            max_staleness: self.max_staleness(),
            max_confidence_ratio: self.max_confidence_ratio,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            venue: VenueConfig::default(),
            strategy: StrategyConfig::default(),
            session: SessionConfig::default(),
            oracle: OracleConfig::default(),
            feeds: default_feeds(),
            paper: PaperConfig::default(),
            journal: JournalConfig::default(),
        }
    }
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            trader: default_trader(),
            signer_secret: String::new(),
            market: default_market(),
            base_account: default_base_account(),
            quote_account: default_quote_account(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            quote_edge_bps: default_quote_edge_bps(),
            quote_size_quote_atoms: default_quote_size_quote_atoms(),
            post_only: false,
            price_improvement_mode: default_price_improvement_mode(),
            margin_bps: default_margin_bps(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_count: default_tick_count(),
            tick_interval_ms: default_tick_interval_ms(),
            balance_report_every: default_balance_report_every(),
            settle_delay_ms: default_settle_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            failure_alert_threshold: default_failure_alert_threshold(),
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            max_staleness_secs: default_max_staleness_secs(),
            max_confidence_ratio: default_max_confidence_ratio(),
        }
    }
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            base_decimals: default_base_decimals(),
            quote_decimals: default_quote_decimals(),
            tick_size: default_tick_size(),
            best_bid: default_paper_best_bid(),
            best_ask: default_paper_best_ask(),
            base_price_usd: default_base_price_usd(),
            quote_price_usd: default_quote_price_usd(),
            initial_base_atoms: default_initial_base_atoms(),
            initial_quote_atoms: default_initial_quote_atoms(),
            latency_ms: 0,
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: default_journal_enabled(),
            path: default_journal_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.strategy.quote_edge_bps, 3);
        assert_eq!(config.session.balance_report_every, 10);
        assert_eq!(config.session.settle_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_edge_rejected() {
        let mut config = Config::default();
        config.strategy.quote_edge_bps = 0;
        assert!(config.validate().is_err());
        assert_eq!(config.strategy.validate(), Err(PolicyError::ZeroEdge));
    }

    #[test]
    fn test_edge_above_limit_rejected() {
        let mut config = Config::default();
        config.strategy.quote_edge_bps = crate::strategy::MAX_BPS + 1;
        assert!(config.validate().is_err());
        assert!(matches!(
            config.strategy.validate(),
            Err(PolicyError::BpsOutOfRange { name: "edge", .. })
        ));
    }

    #[test]
    fn test_ubermensch_margin_above_edge_rejected() {
        let mut config = Config::default();
        config.strategy.margin_bps = 5;
        assert!(config.validate().is_err());

        config.strategy.price_improvement_mode = PriceImprovementMode::Dime;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_market_without_feeds_rejected() {
        let mut config = Config::default();
        config.venue.market = "BONK-USDC".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("BONK-USDC"));
    }

    #[test]
    fn test_mode_deserializes_from_snake_case() {
        let strategy: StrategyConfig = serde_json::from_str(
            r#"{"quote_edge_bps": 5, "price_improvement_mode": "dime", "post_only": true}"#,
        )
        .unwrap();

        assert_eq!(strategy.price_improvement_mode, PriceImprovementMode::Dime);
        assert_eq!(strategy.quote_edge_bps, 5);
        assert_eq!(strategy.margin_bps, 3);
        assert!(strategy.post_only);
    }
}
