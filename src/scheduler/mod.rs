use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Duration};

use crate::execution::{ExecutionGateway, LedgerError, PositionLedger, PriceFeed};
use crate::models::{CloseReason, Position, Side};
use crate::settings::BotConfig;
use crate::strategy::{Decision, Observation, RuleEngine};

/// Source of cycle timestamps
#[derive(Debug, Clone)]
pub enum Clock {
    /// Real time; used for live and paper trading
    Wall,
    /// Virtual time starting at `now`, advanced by `step` after each cycle
    Simulated {
        now: DateTime<Utc>,
        step: chrono::Duration,
    },
}

impl Clock {
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::Wall => Utc::now(),
            Clock::Simulated { now, .. } => *now,
        }
    }

    fn advance(&mut self) {
        if let Clock::Simulated { now, step } = self {
            *now += *step;
        }
    }
}

/// Outcome of a single fetch -> evaluate -> execute cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleReport {
    /// No usable price this cycle; nothing was touched
    Skipped,
    Held { price: f64 },
    Opened(Position),
    Closed(Position),
    /// The gateway failed; an open position stays open
    ExecutionFailed { side: Side, error: String },
}

/// Tally of cycle outcomes over a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub cycles: u64,
    pub skipped: u64,
    pub held: u64,
    pub opened: u64,
    pub closed: u64,
    pub execution_failures: u64,
}

impl RunStats {
    fn record(&mut self, report: &CycleReport) {
        self.cycles += 1;
        match report {
            CycleReport::Skipped => self.skipped += 1,
            CycleReport::Held { .. } => self.held += 1,
            CycleReport::Opened(_) => self.opened += 1,
            CycleReport::Closed(_) => self.closed += 1,
            CycleReport::ExecutionFailed { .. } => self.execution_failures += 1,
        }
    }
}

/// Drives the trading loop for one symbol
///
/// Cycles run strictly one after another on the calling task. Shutdown is
/// checked between cycles and interrupts the sleep, never a cycle in flight.
pub struct Scheduler {
    config: BotConfig,
    ledger: PositionLedger,
    engine: RuleEngine,
    feed: Arc<dyn PriceFeed>,
    gateway: ExecutionGateway,
    shutdown: watch::Receiver<bool>,
    clock: Clock,
    poll_interval: Duration,
    fetch_timeout: Duration,
    max_cycles: Option<u64>,
}

impl Scheduler {
    pub fn new(
        config: BotConfig,
        ledger: PositionLedger,
        engine: RuleEngine,
        feed: Arc<dyn PriceFeed>,
        gateway: ExecutionGateway,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let poll_interval = Duration::from_secs(config.poll_interval_seconds);
        let fetch_timeout = Duration::from_secs(config.fetch_timeout_secs);

        Self {
            config,
            ledger,
            engine,
            feed,
            gateway,
            shutdown,
            clock: Clock::Wall,
            poll_interval,
            fetch_timeout,
            max_cycles: None,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Stop after `max_cycles` cycles instead of running until shutdown
    pub fn with_max_cycles(mut self, max_cycles: u64) -> Self {
        self.max_cycles = Some(max_cycles);
        self
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn into_ledger(self) -> PositionLedger {
        self.ledger
    }

    /// Run cycles until shutdown (or `max_cycles`)
    ///
    /// Only persistence failures end the loop early; everything else is
    /// logged and retried on the next tick.
    pub async fn run(&mut self) -> Result<RunStats, LedgerError> {
        self.ledger.set_mode(self.gateway.mode())?;

        tracing::info!(
            symbol = %self.config.symbol,
            mode = %self.gateway.mode(),
            entry = self.engine.entry_rule().name(),
            take_profit_pct = self.config.take_profit_pct,
            stop_loss_pct = self.config.stop_loss_pct,
            max_daily_trades = self.config.max_daily_trades,
            poll_secs = self.poll_interval.as_secs(),
            "🚀 Trading loop started"
        );

        let mut stats = RunStats::default();

        loop {
            if *self.shutdown.borrow() {
                tracing::info!("Shutdown requested, stopping trading loop");
                break;
            }

            let now = self.clock.now();
            let report = self.run_cycle_at(now).await?;
            stats.record(&report);

            if self.max_cycles.is_some_and(|max| stats.cycles >= max) {
                break;
            }

            self.clock.advance();

            if self.poll_interval.is_zero() {
                continue;
            }

            tokio::select! {
                _ = sleep(self.poll_interval) => {}
                changed = self.shutdown.changed() => {
                    // A dropped sender can never signal again
                    if changed.is_err() || *self.shutdown.borrow() {
                        tracing::info!("Shutdown requested, stopping trading loop");
                        break;
                    }
                }
            }
        }

        tracing::info!(
            cycles = stats.cycles,
            opened = stats.opened,
            closed = stats.closed,
            skipped = stats.skipped,
            "🛑 Trading loop stopped"
        );

        Ok(stats)
    }

    /// One cycle on the wall clock
    pub async fn run_cycle(&mut self) -> Result<CycleReport, LedgerError> {
        self.run_cycle_at(Utc::now()).await
    }

    /// One cycle as of `now`
    pub async fn run_cycle_at(&mut self, now: DateTime<Utc>) -> Result<CycleReport, LedgerError> {
        let symbol = self.config.symbol.clone();

        let price = match self.fetch_price(&symbol, now).await {
            Some(price) => price,
            None => return Ok(CycleReport::Skipped),
        };

        self.ledger
            .reset_if_new_day(self.config.day_boundary.trading_day(now))?;

        let observation = Observation::new(price, now)
            .with_reference(self.ledger.reference_price(&symbol))
            .with_can_trade(self.ledger.can_trade(self.config.max_daily_trades))
            .with_last_closed_at(self.ledger.state().last_closed_at);

        let decision = self
            .engine
            .evaluate(self.ledger.open_position(&symbol), &observation);

        tracing::debug!(
            symbol = %symbol,
            price,
            reference = ?observation.reference_price,
            can_trade = observation.can_trade,
            decision = ?decision,
            "Evaluated cycle"
        );

        let report = match decision {
            Decision::Hold => CycleReport::Held { price },
            Decision::Open { side } => self.open(&symbol, side, price, now).await?,
            Decision::Close {
                position_id,
                reason,
            } => self.close(&symbol, position_id, reason, price, now).await?,
        };

        self.ledger.record_price(&symbol, price)?;

        Ok(report)
    }

    /// Fetch with timeout; `None` means skip this cycle
    async fn fetch_price(&self, symbol: &str, now: DateTime<Utc>) -> Option<f64> {
        let result = match timeout(self.fetch_timeout, self.feed.get_price(symbol)).await {
            Ok(result) => result,
            Err(_) => Err(crate::execution::FeedError::Timeout(
                self.fetch_timeout.as_secs(),
            )),
        };

        match result {
            Ok(price) if price.is_finite() && price > 0.0 => Some(price),
            Ok(price) => {
                tracing::warn!(
                    symbol = %symbol,
                    cycle_at = %now,
                    error_kind = "invalid_price",
                    price,
                    "⚠️  Feed returned unusable price, skipping cycle"
                );
                None
            }
            Err(e) => {
                tracing::warn!(
                    symbol = %symbol,
                    cycle_at = %now,
                    error_kind = e.kind(),
                    error = %e,
                    "⚠️  Price fetch failed, skipping cycle"
                );
                None
            }
        }
    }

    async fn open(
        &mut self,
        symbol: &str,
        side: Side,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<CycleReport, LedgerError> {
        let amount = self.config.trade_amount;

        let fill = match self
            .gateway
            .submit_at(side, symbol, amount, price, now)
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                tracing::warn!(
                    symbol = %symbol,
                    cycle_at = %now,
                    side = %side,
                    error_kind = e.kind(),
                    error = %e,
                    "❌ Open order failed, nothing recorded"
                );
                return Ok(CycleReport::ExecutionFailed {
                    side,
                    error: e.to_string(),
                });
            }
        };

        let opened = self.ledger.open_filled(symbol, amount, side, &fill);
        Ok(match absorb(opened, symbol, now)? {
            Some(position) => {
                tracing::info!(
                    id = position.id,
                    symbol = %symbol,
                    side = %side,
                    price = position.open_price,
                    "📈 Entered position"
                );
                CycleReport::Opened(position)
            }
            None => CycleReport::Held { price },
        })
    }

    async fn close(
        &mut self,
        symbol: &str,
        position_id: u64,
        reason: CloseReason,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<CycleReport, LedgerError> {
        let Some(position) = self.ledger.open_position(symbol).cloned() else {
            tracing::error!(id = position_id, symbol = %symbol, "Close decided for missing position");
            return Ok(CycleReport::Held { price });
        };
        let side = position.side.opposite();

        let fill = match self
            .gateway
            .submit_at(side, symbol, position.amount, price, now)
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                tracing::error!(
                    id = position_id,
                    symbol = %symbol,
                    cycle_at = %now,
                    reason = %reason,
                    error_kind = e.kind(),
                    error = %e,
                    "❌ Close order failed, position stays open"
                );
                return Ok(CycleReport::ExecutionFailed {
                    side,
                    error: e.to_string(),
                });
            }
        };

        let closed = self.ledger.close_filled(position_id, reason, &fill);
        Ok(match absorb(closed, symbol, now)? {
            Some(position) => {
                tracing::info!(
                    id = position.id,
                    symbol = %symbol,
                    reason = %reason,
                    pnl_pct = position.pnl_percent.unwrap_or_default(),
                    "📉 Exited position"
                );
                CycleReport::Closed(position)
            }
            None => CycleReport::Held { price },
        })
    }
}

/// Propagate fatal ledger errors, log and drop the rest
fn absorb(
    result: Result<Position, LedgerError>,
    symbol: &str,
    now: DateTime<Utc>,
) -> Result<Option<Position>, LedgerError> {
    match result {
        Ok(position) => Ok(Some(position)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            tracing::error!(
                symbol = %symbol,
                cycle_at = %now,
                error_kind = e.kind(),
                error = %e,
                "Ledger rejected mutation"
            );
            Ok(None)
        }
    }
}
