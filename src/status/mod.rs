use std::fmt::Write;
use std::path::Path;

use crate::execution::{LedgerState, LedgerSummary};
use crate::persistence::{PersistenceError, StateFile};

/// Trades shown in the history section, newest first
const HISTORY_LIMIT: usize = 20;

/// Read the persisted ledger without taking ownership of it
///
/// The file is only ever replaced by an atomic rename, so a concurrent reader
/// always sees a complete snapshot.
pub fn read_state(path: &Path) -> Result<Option<LedgerState>, PersistenceError> {
    StateFile::new(path).load()
}

/// Render a human-readable status report
///
/// `direction_aware_pnl` must match the setting the ledger books closes with,
/// so unrealized and realized PnL carry the same sign convention.
pub fn render(state: &LedgerState, direction_aware_pnl: bool) -> String {
    let summary = LedgerSummary::from_state(state);
    let mut out = String::new();

    // Writing to a String cannot fail
    let _ = write_report(&mut out, state, &summary, direction_aware_pnl);
    out
}

fn write_report(
    out: &mut String,
    state: &LedgerState,
    summary: &LedgerSummary,
    direction_aware_pnl: bool,
) -> std::fmt::Result {
    writeln!(out, "╔═══════════════════════════════════════════════════════╗")?;
    writeln!(out, "║                  KRAKENBOT STATUS                     ║")?;
    writeln!(out, "╚═══════════════════════════════════════════════════════╝")?;
    writeln!(out)?;

    writeln!(out, "⚙️  MODE:                 {}", state.mode.to_string().to_uppercase())?;
    writeln!(out, "  Trades Today:          {}", state.daily_trade_count)?;
    writeln!(out, "  Last Reset:            {}", state.last_reset_date)?;
    if let Some(at) = state.last_trade_at {
        writeln!(out, "  Last Trade:            {}", at.format("%Y-%m-%d %H:%M:%S UTC"))?;
    }

    writeln!(out, "\n💹 LAST PRICES")?;
    if state.last_prices.is_empty() {
        writeln!(out, "  (none yet)")?;
    }
    for (symbol, price) in &state.last_prices {
        writeln!(out, "  {:<22} {:.2}", symbol, price)?;
    }

    writeln!(out, "\n📂 OPEN POSITIONS ({})", state.open_positions.len())?;
    for position in state.open_positions.values() {
        let unrealized = state
            .last_prices
            .get(&position.symbol)
            .map(|p| format!("{:+.2}%", position.pnl_percent_at(*p, direction_aware_pnl)))
            .unwrap_or_else(|| "n/a".to_string());
        writeln!(
            out,
            "  #{:<4} {} {} {} @ {:.2}  opened {}  unrealized {}",
            position.id,
            position.side,
            position.amount,
            position.symbol,
            position.open_price,
            position.opened_at.format("%Y-%m-%d %H:%M"),
            unrealized
        )?;
    }

    writeln!(out, "\n📜 TRADE HISTORY")?;
    if state.closed_positions.is_empty() {
        writeln!(out, "  (no closed trades)")?;
    }
    for position in state.closed_positions.iter().rev().take(HISTORY_LIMIT) {
        writeln!(
            out,
            "  #{:<4} {} {} {:.2} -> {:.2}  {:+.2}% ({:+.4})  {}",
            position.id,
            position.side,
            position.symbol,
            position.open_price,
            position.close_price.unwrap_or_default(),
            position.pnl_percent.unwrap_or_default(),
            position.pnl_absolute.unwrap_or_default(),
            position
                .close_reason
                .map(|r| r.to_string())
                .unwrap_or_default()
        )?;
    }
    if state.closed_positions.len() > HISTORY_LIMIT {
        writeln!(
            out,
            "  ... {} older trades",
            state.closed_positions.len() - HISTORY_LIMIT
        )?;
    }

    writeln!(out, "\n📈 SUMMARY")?;
    writeln!(out, "  Closed Trades:         {}", summary.closed_trades)?;
    writeln!(
        out,
        "  Winning Trades:        {} ({:.1}%)",
        summary.winning_trades, summary.win_rate
    )?;
    writeln!(out, "  Losing Trades:         {}", summary.losing_trades)?;
    writeln!(out, "  Total P&L:             {:+.4}", summary.total_pnl)?;
    writeln!(out, "  Average P&L:           {:+.2}%", summary.average_pnl_percent)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::PositionLedger;
    use crate::models::{CloseReason, Side, TradingMode};
    use chrono::NaiveDate;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    #[test]
    fn test_render_empty_state() {
        let report = render(&LedgerState::new(day()), true);

        assert!(report.contains("PAPER"));
        assert!(report.contains("Trades Today:          0"));
        assert!(report.contains("Last Reset:            2024-03-01"));
        assert!(report.contains("(no closed trades)"));
        assert!(report.contains("OPEN POSITIONS (0)"));
    }

    #[test]
    fn test_render_with_trades() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut ledger = PositionLedger::load_or_default(StateFile::new(&path), day()).unwrap();

        ledger.set_mode(TradingMode::Live).unwrap();
        let first = ledger.open("XXBTZGBP", 0.5, 100.0, Side::Buy).unwrap();
        ledger.close(first.id, 110.0, CloseReason::TakeProfit).unwrap();
        ledger.open("XXBTZGBP", 0.5, 105.0, Side::Buy).unwrap();
        ledger.record_price("XXBTZGBP", 102.9).unwrap();

        let state = read_state(&path).unwrap().unwrap();
        let report = render(&state, true);

        assert!(report.contains("LIVE"));
        assert!(report.contains("OPEN POSITIONS (1)"));
        assert!(report.contains("102.90"));
        assert!(report.contains("+10.00%"));
        assert!(report.contains("TAKE_PROFIT"));
        assert!(report.contains("Winning Trades:        1 (100.0%)"));
    }

    #[test]
    fn test_render_unrealized_sell_follows_pnl_convention() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut ledger = PositionLedger::load_or_default(StateFile::new(&path), day()).unwrap();
        ledger.open("XXBTZGBP", 1.0, 100.0, Side::Sell).unwrap();
        ledger.record_price("XXBTZGBP", 95.0).unwrap();

        let aware = render(ledger.state(), true);
        assert!(aware.contains("unrealized +5.00%"));

        let raw = render(ledger.state(), false);
        assert!(raw.contains("unrealized -5.00%"));
    }

    #[test]
    fn test_read_state_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_state(&dir.path().join("state.json")).unwrap().is_none());
    }
}
