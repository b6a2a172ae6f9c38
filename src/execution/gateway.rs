use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

use crate::models::{Fill, Side, TradingMode};

const DEFAULT_ORDER_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("exchange rejected order: {0}")]
    Api(String),

    #[error("unexpected order response: {0}")]
    Parse(String),

    #[error("order submission timed out after {0}s")]
    Timeout(u64),

    #[error("missing API credentials: {0}")]
    MissingCredentials(String),
}

impl ExecutionError {
    /// Short tag for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::Http(_) => "http",
            ExecutionError::Api(_) => "api",
            ExecutionError::Parse(_) => "parse",
            ExecutionError::Timeout(_) => "timeout",
            ExecutionError::MissingCredentials(_) => "credentials",
        }
    }
}

/// Exchange endpoint that accepts market orders
#[async_trait]
pub trait OrderVenue: Send + Sync {
    /// Submit a market order, returning the exchange's order id
    async fn place_market_order(
        &self,
        side: Side,
        symbol: &str,
        amount: f64,
    ) -> Result<String, ExecutionError>;
}

/// Where orders go
enum Route {
    Paper,
    Live(Arc<dyn OrderVenue>),
}

/// Turns decisions into fills, simulated or real
pub struct ExecutionGateway {
    route: Route,
    order_timeout: Duration,
}

impl ExecutionGateway {
    /// Simulated fills only; never touches the network
    pub fn paper() -> Self {
        Self {
            route: Route::Paper,
            order_timeout: Duration::from_secs(DEFAULT_ORDER_TIMEOUT_SECS),
        }
    }

    /// Market orders go to `venue`
    pub fn live(venue: Arc<dyn OrderVenue>) -> Self {
        Self {
            route: Route::Live(venue),
            order_timeout: Duration::from_secs(DEFAULT_ORDER_TIMEOUT_SECS),
        }
    }

    pub fn with_order_timeout(mut self, order_timeout: Duration) -> Self {
        self.order_timeout = order_timeout;
        self
    }

    pub fn mode(&self) -> TradingMode {
        match self.route {
            Route::Paper => TradingMode::Paper,
            Route::Live(_) => TradingMode::Live,
        }
    }

    /// Execute a market order for `amount` of `symbol` now
    ///
    /// `observed_price` is the price the decision was made on. Paper fills use
    /// it directly; live fills report it too since Kraken's AddOrder does not
    /// return an execution price.
    pub async fn submit(
        &self,
        side: Side,
        symbol: &str,
        amount: f64,
        observed_price: f64,
    ) -> Result<Fill, ExecutionError> {
        self.submit_at(side, symbol, amount, observed_price, Utc::now())
            .await
    }

    /// Same as [`submit`](Self::submit), stamping the fill with `at`
    pub async fn submit_at(
        &self,
        side: Side,
        symbol: &str,
        amount: f64,
        observed_price: f64,
        at: DateTime<Utc>,
    ) -> Result<Fill, ExecutionError> {
        match &self.route {
            Route::Paper => {
                let fill = Fill {
                    price: observed_price,
                    timestamp: at,
                    external_id: format!("paper-{}", Uuid::new_v4()),
                    paper: true,
                };
                tracing::info!(
                    symbol = %symbol,
                    side = %side,
                    amount,
                    price = observed_price,
                    id = %fill.external_id,
                    "📝 Paper fill"
                );
                Ok(fill)
            }
            Route::Live(venue) => {
                let order_id = timeout(
                    self.order_timeout,
                    venue.place_market_order(side, symbol, amount),
                )
                .await
                .map_err(|_| ExecutionError::Timeout(self.order_timeout.as_secs()))??;

                tracing::info!(
                    symbol = %symbol,
                    side = %side,
                    amount,
                    price = observed_price,
                    order_id = %order_id,
                    "💸 Live market order placed"
                );

                Ok(Fill {
                    price: observed_price,
                    timestamp: at,
                    external_id: order_id,
                    paper: false,
                })
            }
        }
    }
}
