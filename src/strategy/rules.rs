use chrono::{DateTime, Duration, Utc};

use super::{AlwaysEntry, DipEntry, EntryRule};
use crate::models::{CloseReason, Position, Side};
use crate::settings::{BotConfig, EntryStrategyKind, MAX_COOLDOWN_SECONDS, MAX_HOLD_MINUTES};

/// What the engine wants done this cycle
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Open { side: Side },
    Close { position_id: u64, reason: CloseReason },
    Hold,
}

/// Market and book facts the engine decides on
#[derive(Debug, Clone)]
pub struct Observation {
    pub price: f64,
    pub at: DateTime<Utc>,
    pub reference_price: Option<f64>,
    pub can_trade: bool,
    pub last_closed_at: Option<DateTime<Utc>>,
}

impl Observation {
    pub fn new(price: f64, at: DateTime<Utc>) -> Self {
        Self {
            price,
            at,
            reference_price: None,
            can_trade: true,
            last_closed_at: None,
        }
    }

    pub fn with_reference(mut self, reference_price: Option<f64>) -> Self {
        self.reference_price = reference_price;
        self
    }

    pub fn with_can_trade(mut self, can_trade: bool) -> Self {
        self.can_trade = can_trade;
        self
    }

    pub fn with_last_closed_at(mut self, last_closed_at: Option<DateTime<Utc>>) -> Self {
        self.last_closed_at = last_closed_at;
        self
    }
}

/// Threshold rule: entry predicate, take-profit, stop-loss, time stop
///
/// No I/O and no clock reads; everything comes in through [`Observation`].
#[derive(Debug)]
pub struct RuleEngine {
    entry: Box<dyn EntryRule>,
    side: Side,
    take_profit_pct: f64,
    stop_loss_pct: f64,
    max_hold: Option<Duration>,
    cooldown: Duration,
    direction_aware_pnl: bool,
}

impl RuleEngine {
    pub fn new(entry: Box<dyn EntryRule>, take_profit_pct: f64, stop_loss_pct: f64) -> Self {
        Self {
            entry,
            side: Side::Buy,
            take_profit_pct,
            stop_loss_pct,
            max_hold: None,
            cooldown: Duration::zero(),
            direction_aware_pnl: true,
        }
    }

    /// Build the engine a validated config describes
    pub fn from_config(config: &BotConfig) -> Self {
        let entry: Box<dyn EntryRule> = match config.entry_strategy {
            EntryStrategyKind::Always => Box::new(AlwaysEntry),
            EntryStrategyKind::Dip => Box::new(DipEntry::new(config.dip_pct)),
        };

        // Clamped to the validated ranges so an unvalidated config cannot overflow
        let cooldown_secs = config.cooldown_seconds.min(MAX_COOLDOWN_SECONDS) as i64;
        let mut engine = Self::new(entry, config.take_profit_pct, config.stop_loss_pct)
            .with_side(config.position_side)
            .with_cooldown(Duration::seconds(cooldown_secs));
        engine.direction_aware_pnl = config.direction_aware_pnl;
        if let Some(minutes) = config.max_hold_minutes {
            let minutes = minutes.min(MAX_HOLD_MINUTES) as i64;
            engine = engine.with_max_hold(Duration::minutes(minutes));
        }
        engine
    }

    pub fn with_side(mut self, side: Side) -> Self {
        self.side = side;
        self
    }

    pub fn with_max_hold(mut self, max_hold: Duration) -> Self {
        self.max_hold = Some(max_hold);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn entry_rule(&self) -> &dyn EntryRule {
        self.entry.as_ref()
    }

    pub fn evaluate(&self, position: Option<&Position>, observation: &Observation) -> Decision {
        if !(observation.price.is_finite() && observation.price > 0.0) {
            return Decision::Hold;
        }

        match position.filter(|p| p.is_open()) {
            Some(position) => match self.exit_reason(position, observation) {
                Some(reason) => Decision::Close {
                    position_id: position.id,
                    reason,
                },
                None => Decision::Hold,
            },
            None => {
                if observation.can_trade
                    && !self.in_cooldown(observation)
                    && self
                        .entry
                        .should_enter(observation.price, observation.reference_price)
                {
                    Decision::Open { side: self.side }
                } else {
                    Decision::Hold
                }
            }
        }
    }

    /// Exit check for an open position; take-profit wins ties
    pub fn exit_reason(&self, position: &Position, observation: &Observation) -> Option<CloseReason> {
        let pnl_pct = position.pnl_percent_at(observation.price, self.direction_aware_pnl);

        if pnl_pct >= self.take_profit_pct {
            return Some(CloseReason::TakeProfit);
        }
        if pnl_pct <= -self.stop_loss_pct {
            return Some(CloseReason::StopLoss);
        }
        if let Some(max_hold) = self.max_hold {
            if observation.at - position.opened_at >= max_hold {
                return Some(CloseReason::TimeStop);
            }
        }

        None
    }

    fn in_cooldown(&self, observation: &Observation) -> bool {
        match observation.last_closed_at {
            Some(closed_at) if self.cooldown > Duration::zero() => {
                observation.at - closed_at < self.cooldown
            }
            _ => false,
        }
    }
}
