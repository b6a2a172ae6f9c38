use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{CloseReason, Fill, Position, PositionStatus, Side, TradingMode};
use crate::persistence::{PersistenceError, StateFile};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("position {id} already open for {symbol}")]
    PositionExists { symbol: String, id: u64 },

    #[error("no open position with id {0}")]
    PositionNotFound(u64),

    #[error("invalid amount {0}: must be > 0")]
    InvalidAmount(f64),

    #[error("invalid price {0}: must be > 0")]
    InvalidPrice(f64),

    #[error("no open position for {0}")]
    NoOpenPosition(String),

    #[error("position for {0} is live; close it on the exchange, not in the ledger")]
    LiveManualClose(String),

    #[error("failed to persist ledger: {0}")]
    Persistence(#[from] PersistenceError),
}

impl LedgerError {
    /// Durability can no longer be guaranteed; trading must stop
    pub fn is_fatal(&self) -> bool {
        matches!(self, LedgerError::Persistence(_))
    }

    /// Short tag for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::PositionExists { .. } => "position_exists",
            LedgerError::PositionNotFound(_) => "position_not_found",
            LedgerError::InvalidAmount(_) => "invalid_amount",
            LedgerError::InvalidPrice(_) => "invalid_price",
            LedgerError::NoOpenPosition(_) => "no_open_position",
            LedgerError::LiveManualClose(_) => "live_manual_close",
            LedgerError::Persistence(_) => "persistence",
        }
    }
}

/// Everything the bot persists between cycles and restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerState {
    pub open_positions: BTreeMap<String, Position>,
    pub closed_positions: Vec<Position>,
    pub daily_trade_count: u32,
    pub last_reset_date: NaiveDate,
    #[serde(default)]
    pub last_prices: BTreeMap<String, f64>,
    #[serde(default)]
    pub last_trade_prices: BTreeMap<String, f64>,
    #[serde(default)]
    pub last_trade_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_closed_at: Option<DateTime<Utc>>,
    pub next_position_id: u64,
    #[serde(default)]
    pub mode: TradingMode,
}

impl LedgerState {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            open_positions: BTreeMap::new(),
            closed_positions: Vec::new(),
            daily_trade_count: 0,
            last_reset_date: today,
            last_prices: BTreeMap::new(),
            last_trade_prices: BTreeMap::new(),
            last_trade_at: None,
            last_closed_at: None,
            next_position_id: 1,
            mode: TradingMode::default(),
        }
    }
}

/// Aggregate figures over closed positions
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSummary {
    pub closed_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub average_pnl_percent: f64,
}

impl LedgerSummary {
    pub fn from_state(state: &LedgerState) -> Self {
        let closed = &state.closed_positions;
        let pnls: Vec<f64> = closed.iter().filter_map(|p| p.pnl_absolute).collect();
        let winning_trades = pnls.iter().filter(|&&p| p > 0.0).count();
        let losing_trades = pnls.iter().filter(|&&p| p < 0.0).count();

        let win_rate = if closed.is_empty() {
            0.0
        } else {
            winning_trades as f64 / closed.len() as f64 * 100.0
        };

        let pct: Vec<f64> = closed.iter().filter_map(|p| p.pnl_percent).collect();
        let average_pnl_percent = if pct.is_empty() {
            0.0
        } else {
            pct.iter().sum::<f64>() / pct.len() as f64
        };

        Self {
            closed_trades: closed.len(),
            winning_trades,
            losing_trades,
            win_rate,
            total_pnl: pnls.iter().sum(),
            average_pnl_percent,
        }
    }
}

/// Sole owner and writer of [`LedgerState`]
///
/// Each mutation is applied to a copy, persisted, and only then swapped in. A
/// failed write therefore leaves both the file and the in-memory view as they
/// were.
pub struct PositionLedger {
    state: LedgerState,
    store: StateFile,
    direction_aware_pnl: bool,
}

impl PositionLedger {
    /// Load the ledger from `store`, or start empty if nothing is stored yet
    pub fn load_or_default(store: StateFile, today: NaiveDate) -> Result<Self, LedgerError> {
        let state = match store.load::<LedgerState>()? {
            Some(state) => {
                tracing::info!(
                    path = %store.path().display(),
                    open = state.open_positions.len(),
                    closed = state.closed_positions.len(),
                    daily_trades = state.daily_trade_count,
                    "Restored ledger from disk"
                );
                state
            }
            None => {
                tracing::info!(path = %store.path().display(), "No ledger on disk, starting fresh");
                LedgerState::new(today)
            }
        };

        Ok(Self::with_state(store, state))
    }

    pub fn with_state(store: StateFile, state: LedgerState) -> Self {
        Self {
            state,
            store,
            direction_aware_pnl: true,
        }
    }

    /// Whether SELL positions book a gain when price falls (default: yes)
    pub fn with_direction_aware_pnl(mut self, direction_aware: bool) -> Self {
        self.direction_aware_pnl = direction_aware;
        self
    }

    fn commit(&mut self, next: LedgerState) -> Result<(), LedgerError> {
        self.store.save(&next)?;
        self.state = next;
        Ok(())
    }

    /// Read-only view of the current state
    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    /// Snapshot for status readers
    pub fn current_state(&self) -> LedgerState {
        self.state.clone()
    }

    pub fn store(&self) -> &StateFile {
        &self.store
    }

    pub fn open_position(&self, symbol: &str) -> Option<&Position> {
        self.state.open_positions.get(symbol)
    }

    pub fn has_open_position(&self, symbol: &str) -> bool {
        self.state.open_positions.contains_key(symbol)
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.state.open_positions.values()
    }

    pub fn closed_positions(&self) -> &[Position] {
        &self.state.closed_positions
    }

    pub fn can_trade(&self, max_daily_trades: u32) -> bool {
        self.state.daily_trade_count < max_daily_trades
    }

    /// Price the dip entry measures against: last fill, else last observation
    pub fn reference_price(&self, symbol: &str) -> Option<f64> {
        self.state
            .last_trade_prices
            .get(symbol)
            .or_else(|| self.state.last_prices.get(symbol))
            .copied()
    }

    pub fn summary(&self) -> LedgerSummary {
        LedgerSummary::from_state(&self.state)
    }

    /// Open a position booked at `price` now, without an exchange fill
    pub fn open(
        &mut self,
        symbol: &str,
        amount: f64,
        price: f64,
        side: Side,
    ) -> Result<Position, LedgerError> {
        let fill = Fill {
            price,
            timestamp: Utc::now(),
            external_id: String::new(),
            paper: true,
        };
        self.open_filled(symbol, amount, side, &fill)
    }

    /// Open a position from an executed fill
    pub fn open_filled(
        &mut self,
        symbol: &str,
        amount: f64,
        side: Side,
        fill: &Fill,
    ) -> Result<Position, LedgerError> {
        if let Some(existing) = self.state.open_positions.get(symbol) {
            return Err(LedgerError::PositionExists {
                symbol: symbol.to_string(),
                id: existing.id,
            });
        }
        if !(amount.is_finite() && amount > 0.0) {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if !(fill.price.is_finite() && fill.price > 0.0) {
            return Err(LedgerError::InvalidPrice(fill.price));
        }

        let mut next = self.state.clone();
        let position = Position {
            id: next.next_position_id,
            symbol: symbol.to_string(),
            side,
            amount,
            open_price: fill.price,
            opened_at: fill.timestamp,
            status: PositionStatus::Open,
            paper: fill.paper,
            open_order_id: non_empty(&fill.external_id),
            close_price: None,
            closed_at: None,
            close_reason: None,
            close_order_id: None,
            pnl_percent: None,
            pnl_absolute: None,
        };

        next.next_position_id += 1;
        next.daily_trade_count += 1;
        next.last_trade_at = Some(fill.timestamp);
        next.last_trade_prices.insert(symbol.to_string(), fill.price);
        next.open_positions
            .insert(symbol.to_string(), position.clone());

        self.commit(next)?;

        tracing::info!(
            id = position.id,
            symbol = %position.symbol,
            side = %position.side,
            amount = position.amount,
            price = position.open_price,
            daily_trades = self.state.daily_trade_count,
            "Opened position"
        );

        Ok(position)
    }

    /// Close an open position at `price` now, without an exchange fill
    pub fn close(
        &mut self,
        position_id: u64,
        price: f64,
        reason: CloseReason,
    ) -> Result<Position, LedgerError> {
        let fill = Fill {
            price,
            timestamp: Utc::now(),
            external_id: String::new(),
            paper: true,
        };
        self.close_filled(position_id, reason, &fill)
    }

    /// Close an open position from an executed fill
    pub fn close_filled(
        &mut self,
        position_id: u64,
        reason: CloseReason,
        fill: &Fill,
    ) -> Result<Position, LedgerError> {
        let symbol = self
            .state
            .open_positions
            .values()
            .find(|p| p.id == position_id)
            .map(|p| p.symbol.clone())
            .ok_or(LedgerError::PositionNotFound(position_id))?;

        if !(fill.price.is_finite() && fill.price > 0.0) {
            return Err(LedgerError::InvalidPrice(fill.price));
        }

        let mut next = self.state.clone();
        let mut position = next
            .open_positions
            .remove(&symbol)
            .ok_or(LedgerError::PositionNotFound(position_id))?;

        position.status = PositionStatus::Closed;
        position.close_price = Some(fill.price);
        position.closed_at = Some(fill.timestamp);
        position.close_reason = Some(reason);
        position.close_order_id = non_empty(&fill.external_id);
        position.pnl_percent = Some(position.pnl_percent_at(fill.price, self.direction_aware_pnl));
        position.pnl_absolute =
            Some(position.pnl_absolute_at(fill.price, self.direction_aware_pnl));

        next.last_trade_at = Some(fill.timestamp);
        next.last_closed_at = Some(fill.timestamp);
        next.last_trade_prices.insert(symbol, fill.price);
        next.closed_positions.push(position.clone());

        self.commit(next)?;

        tracing::info!(
            id = position.id,
            symbol = %position.symbol,
            reason = %reason,
            price = fill.price,
            pnl_pct = position.pnl_percent.unwrap_or_default(),
            pnl = position.pnl_absolute.unwrap_or_default(),
            "Closed position"
        );

        Ok(position)
    }

    /// Book a MANUAL close of the paper position open for `symbol`
    ///
    /// Live positions are refused: the ledger cannot send the matching
    /// exchange order.
    pub fn close_manual(&mut self, symbol: &str, price: f64) -> Result<Position, LedgerError> {
        let position = self
            .open_position(symbol)
            .ok_or_else(|| LedgerError::NoOpenPosition(symbol.to_string()))?;

        if self.state.mode == TradingMode::Live || !position.paper {
            return Err(LedgerError::LiveManualClose(symbol.to_string()));
        }

        let id = position.id;
        self.close(id, price, CloseReason::Manual)
    }

    /// Zero the daily counter on the first call of a new trading day
    pub fn reset_if_new_day(&mut self, today: NaiveDate) -> Result<bool, LedgerError> {
        if self.state.last_reset_date == today {
            return Ok(false);
        }

        let mut next = self.state.clone();
        next.daily_trade_count = 0;
        next.last_reset_date = today;
        self.commit(next)?;

        tracing::info!(date = %today, "New trading day, daily trade count reset");
        Ok(true)
    }

    pub fn record_price(&mut self, symbol: &str, price: f64) -> Result<(), LedgerError> {
        if !(price.is_finite() && price > 0.0) {
            return Err(LedgerError::InvalidPrice(price));
        }

        let mut next = self.state.clone();
        next.last_prices.insert(symbol.to_string(), price);
        self.commit(next)
    }

    pub fn set_mode(&mut self, mode: TradingMode) -> Result<(), LedgerError> {
        if self.state.mode == mode {
            return Ok(());
        }

        let mut next = self.state.clone();
        next.mode = mode;
        self.commit(next)
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tokio_test::{assert_err, assert_ok};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn new_ledger(dir: &tempfile::TempDir) -> PositionLedger {
        let store = StateFile::new(dir.path().join("state.json"));
        PositionLedger::load_or_default(store, day(1)).unwrap()
    }

    fn reload(dir: &tempfile::TempDir) -> LedgerState {
        StateFile::new(dir.path().join("state.json"))
            .load::<LedgerState>()
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_open_position() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = new_ledger(&dir);

        let position = assert_ok!(ledger.open("XXBTZGBP", 0.5, 100.0, Side::Buy));

        assert_eq!(position.id, 1);
        assert_eq!(position.open_price, 100.0);
        assert_eq!(position.status, PositionStatus::Open);
        assert!(ledger.has_open_position("XXBTZGBP"));
        assert_eq!(ledger.state().daily_trade_count, 1);

        // Written through before returning
        assert_eq!(reload(&dir), ledger.current_state());
    }

    #[test]
    fn test_prevent_duplicate_positions() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = new_ledger(&dir);
        ledger.open("XXBTZGBP", 1.0, 100.0, Side::Buy).unwrap();

        let err = assert_err!(ledger.open("XXBTZGBP", 1.0, 105.0, Side::Buy));
        assert!(matches!(err, LedgerError::PositionExists { id: 1, .. }));
        assert!(!err.is_fatal());

        // Rejected open does not count as a trade
        assert_eq!(ledger.state().daily_trade_count, 1);
    }

    #[test]
    fn test_rejects_bad_amount_and_price() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = new_ledger(&dir);

        assert!(matches!(
            ledger.open("XXBTZGBP", 0.0, 100.0, Side::Buy),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            ledger.open("XXBTZGBP", 1.0, -1.0, Side::Buy),
            Err(LedgerError::InvalidPrice(_))
        ));
        assert_eq!(ledger.state().open_positions.len(), 0);
    }

    #[test]
    fn test_close_position_buy() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = new_ledger(&dir);
        let opened = ledger.open("XXBTZGBP", 2.0, 100.0, Side::Buy).unwrap();

        let closed = ledger
            .close(opened.id, 110.0, CloseReason::TakeProfit)
            .unwrap();

        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.close_price, Some(110.0));
        assert_eq!(closed.close_reason, Some(CloseReason::TakeProfit));
        assert!((closed.pnl_percent.unwrap() - 10.0).abs() < 1e-9);
        assert!((closed.pnl_absolute.unwrap() - 20.0).abs() < 1e-9);

        assert!(!ledger.has_open_position("XXBTZGBP"));
        assert_eq!(ledger.closed_positions().len(), 1);
        assert_eq!(reload(&dir).closed_positions.len(), 1);
    }

    #[test]
    fn test_close_position_sell_flips_sign() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = new_ledger(&dir);
        let opened = ledger.open("XXBTZGBP", 2.0, 100.0, Side::Sell).unwrap();

        let closed = ledger.close(opened.id, 95.0, CloseReason::TakeProfit).unwrap();
        assert!((closed.pnl_percent.unwrap() - 5.0).abs() < 1e-9);
        assert!((closed.pnl_absolute.unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_take_profit_pnl_percent() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = new_ledger(&dir);
        let opened = ledger.open("XXBTZGBP", 1.0, 100.0, Side::Buy).unwrap();

        let closed = ledger
            .close(opened.id, 105.1, CloseReason::TakeProfit)
            .unwrap();
        assert!((closed.pnl_percent.unwrap() - 5.1).abs() < 1e-9);
        assert!((reload(&dir).closed_positions[0].pnl_percent.unwrap() - 5.1).abs() < 1e-9);
    }

    #[test]
    fn test_stop_loss_pnl_percent() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = new_ledger(&dir);
        let opened = ledger.open("XXBTZGBP", 1.0, 100.0, Side::Buy).unwrap();

        let closed = ledger.close(opened.id, 96.9, CloseReason::StopLoss).unwrap();
        assert!((closed.pnl_percent.unwrap() - (-3.1)).abs() < 1e-9);
        assert!((closed.pnl_absolute.unwrap() - (-3.1)).abs() < 1e-9);
    }

    #[test]
    fn test_close_manual_paper_position() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = new_ledger(&dir);
        ledger.open("XXBTZGBP", 1.0, 100.0, Side::Buy).unwrap();

        let closed = assert_ok!(ledger.close_manual("XXBTZGBP", 102.0));
        assert_eq!(closed.close_reason, Some(CloseReason::Manual));
        assert!(!reload(&dir).open_positions.contains_key("XXBTZGBP"));
    }

    #[test]
    fn test_close_manual_without_open_position() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = new_ledger(&dir);

        let err = assert_err!(ledger.close_manual("XXBTZGBP", 100.0));
        assert!(matches!(err, LedgerError::NoOpenPosition(ref s) if s == "XXBTZGBP"));
        assert_eq!(err.kind(), "no_open_position");
    }

    #[test]
    fn test_close_manual_refused_in_live_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = new_ledger(&dir);
        ledger.set_mode(TradingMode::Live).unwrap();
        let fill = Fill {
            price: 100.0,
            timestamp: Utc::now(),
            external_id: "OBUY-1".to_string(),
            paper: false,
        };
        ledger.open_filled("XXBTZGBP", 1.0, Side::Buy, &fill).unwrap();
        let before = reload(&dir);

        let err = assert_err!(ledger.close_manual("XXBTZGBP", 101.0));
        assert!(matches!(err, LedgerError::LiveManualClose(_)));
        assert!(!err.is_fatal());
        assert!(ledger.has_open_position("XXBTZGBP"));
        assert_eq!(reload(&dir), before);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(LedgerError::PositionNotFound(1).kind(), "position_not_found");
        assert_eq!(LedgerError::InvalidPrice(-1.0).kind(), "invalid_price");
        assert_eq!(
            LedgerError::PositionExists {
                symbol: "XXBTZGBP".into(),
                id: 1
            }
            .kind(),
            "position_exists"
        );
        assert_eq!(
            LedgerError::LiveManualClose("XXBTZGBP".into()).kind(),
            "live_manual_close"
        );
    }

    #[test]
    fn test_close_unknown_position() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = new_ledger(&dir);

        let err = assert_err!(ledger.close(42, 100.0, CloseReason::Manual));
        assert!(matches!(err, LedgerError::PositionNotFound(42)));
        // Nothing was written
        assert!(!dir.path().join("state.json").exists());
    }

    #[test]
    fn test_cannot_close_twice() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = new_ledger(&dir);
        let opened = ledger.open("XXBTZGBP", 1.0, 100.0, Side::Buy).unwrap();
        ledger.close(opened.id, 101.0, CloseReason::Manual).unwrap();

        let err = assert_err!(ledger.close(opened.id, 102.0, CloseReason::Manual));
        assert!(matches!(err, LedgerError::PositionNotFound(_)));
        assert_eq!(ledger.closed_positions().len(), 1);
    }

    #[test]
    fn test_ids_are_monotonic_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut ledger = new_ledger(&dir);
            let p = ledger.open("XXBTZGBP", 1.0, 100.0, Side::Buy).unwrap();
            ledger.close(p.id, 100.0, CloseReason::Manual).unwrap();
        }

        let mut ledger = new_ledger(&dir);
        let p = ledger.open("XXBTZGBP", 1.0, 100.0, Side::Buy).unwrap();
        assert_eq!(p.id, 2);
    }

    #[test]
    fn test_reset_if_new_day_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = new_ledger(&dir);
        ledger.open("XXBTZGBP", 1.0, 100.0, Side::Buy).unwrap();

        assert!(!ledger.reset_if_new_day(day(1)).unwrap());
        assert_eq!(ledger.state().daily_trade_count, 1);

        assert!(ledger.reset_if_new_day(day(2)).unwrap());
        assert_eq!(ledger.state().daily_trade_count, 0);
        assert_eq!(ledger.state().last_reset_date, day(2));

        assert!(!ledger.reset_if_new_day(day(2)).unwrap());
        assert_eq!(ledger.state().daily_trade_count, 0);
        assert_eq!(reload(&dir).last_reset_date, day(2));
    }

    #[test]
    fn test_can_trade() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = new_ledger(&dir);
        for _ in 0..3 {
            let p = ledger.open("XXBTZGBP", 1.0, 100.0, Side::Buy).unwrap();
            ledger.close(p.id, 100.0, CloseReason::Manual).unwrap();
        }

        assert_eq!(ledger.state().daily_trade_count, 3);
        assert!(!ledger.can_trade(3));
        assert!(ledger.can_trade(4));
    }

    #[test]
    fn test_reference_price_prefers_last_fill() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = new_ledger(&dir);
        assert_eq!(ledger.reference_price("XXBTZGBP"), None);

        ledger.record_price("XXBTZGBP", 101.0).unwrap();
        assert_eq!(ledger.reference_price("XXBTZGBP"), Some(101.0));

        ledger.open("XXBTZGBP", 1.0, 99.0, Side::Buy).unwrap();
        ledger.record_price("XXBTZGBP", 103.0).unwrap();
        assert_eq!(ledger.reference_price("XXBTZGBP"), Some(99.0));
    }

    #[test]
    fn test_failed_persist_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateFile::new(dir.path().join("gone").join("state.json"));
        let mut ledger = PositionLedger::with_state(store, LedgerState::new(day(1)));

        let err = assert_err!(ledger.open("XXBTZGBP", 1.0, 100.0, Side::Buy));
        assert!(err.is_fatal());
        assert!(!ledger.has_open_position("XXBTZGBP"));
        assert_eq!(ledger.state().daily_trade_count, 0);
        assert_eq!(ledger.state().next_position_id, 1);
    }

    #[test]
    fn test_round_trip_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = new_ledger(&dir);
        ledger.set_mode(TradingMode::Live).unwrap();
        ledger.record_price("XXBTZGBP", 97.123456789).unwrap();
        let p = ledger.open("XXBTZGBP", 0.001, 97.9, Side::Buy).unwrap();
        ledger.close(p.id, 105.1, CloseReason::TakeProfit).unwrap();
        ledger.open("XETHZGBP", 0.3, 2500.5, Side::Sell).unwrap();

        let reloaded = reload(&dir);
        assert_eq!(reloaded, ledger.current_state());

        let store = StateFile::new(dir.path().join("state.json"));
        let restored = PositionLedger::load_or_default(store, day(9)).unwrap();
        assert_eq!(restored.state(), ledger.state());
    }

    #[test]
    fn test_at_most_one_open_per_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = new_ledger(&dir);
        let mut rng = StdRng::seed_from_u64(7);
        let symbols = ["XXBTZGBP", "XETHZGBP", "SOLGBP"];

        for _ in 0..200 {
            let symbol = symbols[rng.gen_range(0..symbols.len())];
            let price = rng.gen_range(50.0..150.0);

            if rng.gen_bool(0.5) {
                let had_open = ledger.has_open_position(symbol);
                let result = ledger.open(symbol, 1.0, price, Side::Buy);
                assert_eq!(result.is_err(), had_open);
            } else if let Some(id) = ledger.open_position(symbol).map(|p| p.id) {
                ledger.close(id, price, CloseReason::Manual).unwrap();
            }

            for symbol in symbols {
                let open = ledger.open_positions().filter(|p| p.symbol == symbol).count();
                assert!(open <= 1);
            }
            assert!(ledger.closed_positions().iter().all(|p| !p.is_open()));
        }
    }

    #[test]
    fn test_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = new_ledger(&dir);

        let p = ledger.open("XXBTZGBP", 1.0, 100.0, Side::Buy).unwrap();
        ledger.close(p.id, 110.0, CloseReason::TakeProfit).unwrap();
        let p = ledger.open("XXBTZGBP", 1.0, 100.0, Side::Buy).unwrap();
        ledger.close(p.id, 96.0, CloseReason::StopLoss).unwrap();

        let summary = ledger.summary();
        assert_eq!(summary.closed_trades, 2);
        assert_eq!(summary.winning_trades, 1);
        assert_eq!(summary.losing_trades, 1);
        assert_eq!(summary.win_rate, 50.0);
        assert!((summary.total_pnl - 6.0).abs() < 1e-9);
        assert!((summary.average_pnl_percent - 3.0).abs() < 1e-9);
    }
}
