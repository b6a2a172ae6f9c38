use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of an order or of the position it opened
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    #[serde(alias = "buy")]
    Buy,
    #[serde(alias = "sell")]
    Sell,
}

impl Side {
    /// Side of the order that closes a position opened on `self`
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Lowercase form used by the Kraken API (`type=buy`)
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    TimeStop,
    Manual,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::TakeProfit => "TAKE_PROFIT",
            CloseReason::StopLoss => "STOP_LOSS",
            CloseReason::TimeStop => "TIME_STOP",
            CloseReason::Manual => "MANUAL",
        };
        f.write_str(s)
    }
}

/// Whether orders reach the exchange
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    #[default]
    Paper,
    Live,
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingMode::Paper => write!(f, "paper"),
            TradingMode::Live => write!(f, "live"),
        }
    }
}

/// Result of a submitted (or simulated) order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fill {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub external_id: String,
    pub paper: bool,
}

/// A position in one symbol
///
/// Close fields and PnL are `Some` exactly when `status` is `Closed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub id: u64,
    pub symbol: String,
    pub side: Side,
    pub amount: f64,
    pub open_price: f64,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
    #[serde(default)]
    pub paper: bool,
    #[serde(default)]
    pub open_order_id: Option<String>,
    #[serde(default)]
    pub close_price: Option<f64>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub close_reason: Option<CloseReason>,
    #[serde(default)]
    pub close_order_id: Option<String>,
    #[serde(default)]
    pub pnl_percent: Option<f64>,
    #[serde(default)]
    pub pnl_absolute: Option<f64>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Unrealized PnL in percent at `price`
    ///
    /// With `direction_aware` a SELL position gains when price falls.
    pub fn pnl_percent_at(&self, price: f64, direction_aware: bool) -> f64 {
        let raw = (price - self.open_price) / self.open_price * 100.0;
        if direction_aware && self.side == Side::Sell {
            -raw
        } else {
            raw
        }
    }

    /// Unrealized PnL in quote currency at `price`
    pub fn pnl_absolute_at(&self, price: f64, direction_aware: bool) -> f64 {
        let raw = (price - self.open_price) * self.amount;
        if direction_aware && self.side == Side::Sell {
            -raw
        } else {
            raw
        }
    }
}
