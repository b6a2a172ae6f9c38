//! Bot configuration
//!
//! Loaded once at startup from a JSON file, with `KRAKENBOT_*` environment
//! variables layered on top. Validation runs before the poll loop starts so a
//! bad file never reaches the exchange.

use chrono::{DateTime, Local, NaiveDate, Utc};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::models::{Side, TradingMode};

pub const DEFAULT_CONFIG_PATH: &str = "data/config.json";
const ENV_PREFIX: &str = "KRAKENBOT";

/// Longest accepted `cooldown_seconds` (one week)
pub const MAX_COOLDOWN_SECONDS: u64 = 7 * 24 * 60 * 60;
/// Longest accepted `max_hold_minutes` (one year)
pub const MAX_HOLD_MINUTES: u64 = 365 * 24 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How the bot decides to enter a position when flat
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryStrategyKind {
    /// Enter whenever there is no open position and trades remain
    Always,
    /// Enter after price falls `dip_pct` below the reference price
    Dip,
}

/// Which calendar the daily trade counter follows
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DayBoundary {
    Utc,
    Local,
}

impl DayBoundary {
    /// Trading day that `now` falls on
    pub fn trading_day(self, now: DateTime<Utc>) -> NaiveDate {
        match self {
            DayBoundary::Utc => now.date_naive(),
            DayBoundary::Local => now.with_timezone(&Local).date_naive(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BotConfig {
    #[serde(alias = "trade_symbol")]
    pub symbol: String,
    pub trade_amount: f64,
    pub max_daily_trades: u32,
    pub dip_pct: f64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub paper_trading: bool,
    pub poll_interval_seconds: u64,

    pub entry_strategy: EntryStrategyKind,
    pub position_side: Side,
    pub day_boundary: DayBoundary,
    pub direction_aware_pnl: bool,
    pub max_hold_minutes: Option<u64>,
    pub cooldown_seconds: u64,
    pub fetch_timeout_secs: u64,
    pub order_timeout_secs: u64,
    pub state_file: PathBuf,
    pub api_url: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            symbol: "XXBTZGBP".to_string(),
            trade_amount: 0.001,
            max_daily_trades: 3,
            dip_pct: 2.0,
            take_profit_pct: 5.0,
            stop_loss_pct: 3.0,
            paper_trading: true,
            poll_interval_seconds: 10,
            entry_strategy: EntryStrategyKind::Dip,
            position_side: Side::Buy,
            day_boundary: DayBoundary::Utc,
            direction_aware_pnl: true,
            max_hold_minutes: None,
            cooldown_seconds: 0,
            fetch_timeout_secs: 10,
            order_timeout_secs: 15,
            state_file: PathBuf::from("state.json"),
            api_url: "https://api.kraken.com".to_string(),
        }
    }
}

impl BotConfig {
    /// Load from `path` plus environment overrides, then validate
    ///
    /// A missing file is not an error: defaults and environment still apply.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let config: BotConfig = settings.try_deserialize()?;
        config.validate()?;

        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn mode(&self) -> TradingMode {
        if self.paper_trading {
            TradingMode::Paper
        } else {
            TradingMode::Live
        }
    }

    /// Reject shapes the loop cannot trade on safely
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(msg: impl Into<String>) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid(msg.into()))
        }

        if self.symbol.trim().is_empty() {
            return invalid("symbol must not be empty");
        }
        if !(self.trade_amount.is_finite() && self.trade_amount > 0.0) {
            return invalid(format!("trade_amount must be > 0 (got {})", self.trade_amount));
        }
        if self.max_daily_trades == 0 {
            return invalid("max_daily_trades must be at least 1");
        }
        if !(self.take_profit_pct.is_finite() && self.take_profit_pct > 0.0) {
            return invalid(format!(
                "take_profit_pct must be > 0 (got {})",
                self.take_profit_pct
            ));
        }
        if !(self.stop_loss_pct.is_finite() && self.stop_loss_pct > 0.0) {
            return invalid(format!(
                "stop_loss_pct must be > 0 (got {})",
                self.stop_loss_pct
            ));
        }
        // Both exits would fire on the same pnl
        if self.take_profit_pct <= -self.stop_loss_pct {
            return invalid("take_profit_pct and stop_loss_pct overlap");
        }
        if self.entry_strategy == EntryStrategyKind::Dip
            && !(self.dip_pct.is_finite() && self.dip_pct > 0.0 && self.dip_pct < 100.0)
        {
            return invalid(format!("dip_pct must be in (0, 100) (got {})", self.dip_pct));
        }
        if self.poll_interval_seconds == 0 {
            return invalid("poll_interval_seconds must be at least 1");
        }
        if self.fetch_timeout_secs == 0 || self.order_timeout_secs == 0 {
            return invalid("timeouts must be at least 1 second");
        }
        match self.max_hold_minutes {
            Some(0) => return invalid("max_hold_minutes must be at least 1 when set"),
            Some(minutes) if minutes > MAX_HOLD_MINUTES => {
                return invalid(format!(
                    "max_hold_minutes must be at most {} (got {})",
                    MAX_HOLD_MINUTES, minutes
                ))
            }
            _ => {}
        }
        if self.cooldown_seconds > MAX_COOLDOWN_SECONDS {
            return invalid(format!(
                "cooldown_seconds must be at most {} (got {})",
                MAX_COOLDOWN_SECONDS, self.cooldown_seconds
            ));
        }
        if self.position_side == Side::Sell && !self.direction_aware_pnl {
            return invalid("SELL positions require direction_aware_pnl = true");
        }

        Ok(())
    }
}
