use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;

use crate::execution::{FeedError, PriceFeed};

/// Market scenario types for synthetic price paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarketScenario {
    /// Small upward drift with noise
    Uptrend,
    /// Small downward drift with noise
    Downtrend,
    /// Mean-reverting chop around the start price
    #[default]
    Sideways,
    /// Large swings (±5% per tick)
    Volatile,
}

impl std::str::FromStr for MarketScenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uptrend" | "up" => Ok(Self::Uptrend),
            "downtrend" | "down" => Ok(Self::Downtrend),
            "sideways" => Ok(Self::Sideways),
            "volatile" => Ok(Self::Volatile),
            other => Err(format!("unknown scenario '{}'", other)),
        }
    }
}

struct WalkState {
    rng: StdRng,
    price: f64,
}

/// Seeded random-walk [`PriceFeed`] for offline dry runs
///
/// The same seed always yields the same sequence of prices and failures.
pub struct SyntheticFeed {
    state: Mutex<WalkState>,
    base_price: f64,
    scenario: MarketScenario,
    failure_rate: f64,
}

impl SyntheticFeed {
    pub fn new(seed: u64, start_price: f64) -> Self {
        Self {
            state: Mutex::new(WalkState {
                rng: StdRng::seed_from_u64(seed),
                price: start_price,
            }),
            base_price: start_price,
            scenario: MarketScenario::default(),
            failure_rate: 0.0,
        }
    }

    pub fn with_scenario(mut self, scenario: MarketScenario) -> Self {
        self.scenario = scenario;
        self
    }

    /// Fraction of calls (0.0..=1.0) that fail like a flaky exchange would
    pub fn with_failure_rate(mut self, failure_rate: f64) -> Self {
        self.failure_rate = failure_rate.clamp(0.0, 1.0);
        self
    }

    pub fn scenario(&self) -> MarketScenario {
        self.scenario
    }

    fn step(&self, rng: &mut StdRng, price: f64) -> f64 {
        let next = match self.scenario {
            MarketScenario::Uptrend => price * (1.0 + 0.002 + rng.gen_range(-0.01..0.01)),
            MarketScenario::Downtrend => price * (1.0 - 0.002 + rng.gen_range(-0.01..0.01)),
            MarketScenario::Sideways => {
                // 10% pull to mean
                let reversion = (self.base_price - price) * 0.1;
                price + reversion + price * rng.gen_range(-0.01..0.01)
            }
            MarketScenario::Volatile => price * (1.0 + rng.gen_range(-0.05..0.05)),
        };

        // Prevent price from collapsing towards zero
        next.max(self.base_price * 0.01)
    }
}

#[async_trait]
impl PriceFeed for SyntheticFeed {
    async fn get_price(&self, symbol: &str) -> Result<f64, FeedError> {
        let mut state = self.state.lock().await;

        if self.failure_rate > 0.0 && state.rng.gen_bool(self.failure_rate) {
            return Err(FeedError::Api(format!(
                "simulated outage fetching {}",
                symbol
            )));
        }

        let WalkState { rng, price } = &mut *state;
        *price = self.step(rng, *price);
        Ok(*price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn sample(feed: &SyntheticFeed, n: usize) -> Vec<Result<f64, String>> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(feed.get_price("XXBTZGBP").await.map_err(|e| e.to_string()));
        }
        out
    }

    #[tokio::test]
    async fn test_same_seed_same_path() {
        let a = SyntheticFeed::new(42, 100.0).with_failure_rate(0.2);
        let b = SyntheticFeed::new(42, 100.0).with_failure_rate(0.2);

        assert_eq!(sample(&a, 200).await, sample(&b, 200).await);
    }

    #[tokio::test]
    async fn test_prices_stay_positive() {
        let feed = SyntheticFeed::new(7, 100.0).with_scenario(MarketScenario::Volatile);

        for price in sample(&feed, 1000).await {
            let price = price.unwrap();
            assert!(price.is_finite() && price > 0.0);
        }
    }

    #[tokio::test]
    async fn test_uptrend_ends_higher() {
        let feed = SyntheticFeed::new(42, 100.0).with_scenario(MarketScenario::Uptrend);
        let prices = sample(&feed, 500).await;

        let last = prices.last().cloned().unwrap().unwrap();
        assert!(last > 100.0, "Uptrend should end higher: {}", last);
    }

    #[tokio::test]
    async fn test_downtrend_ends_lower() {
        let feed = SyntheticFeed::new(42, 100.0).with_scenario(MarketScenario::Downtrend);
        let prices = sample(&feed, 500).await;

        let last = prices.last().cloned().unwrap().unwrap();
        assert!(last < 100.0, "Downtrend should end lower: {}", last);
    }

    #[tokio::test]
    async fn test_sideways_stays_near_start() {
        let feed = SyntheticFeed::new(42, 100.0);

        for price in sample(&feed, 500).await {
            let price = price.unwrap();
            assert!(
                price > 90.0 && price < 110.0,
                "Sideways should stay near base: {}",
                price
            );
        }
    }

    #[tokio::test]
    async fn test_failure_rate_injects_errors() {
        let feed = SyntheticFeed::new(1, 100.0).with_failure_rate(1.0);
        let err = feed.get_price("XXBTZGBP").await.unwrap_err();
        assert_eq!(err.kind(), "api");

        let healthy = SyntheticFeed::new(1, 100.0);
        assert!(sample(&healthy, 100).await.iter().all(|r| r.is_ok()));
    }

    #[test]
    fn test_parse_scenario() {
        assert_eq!("Volatile".parse::<MarketScenario>().unwrap(), MarketScenario::Volatile);
        assert_eq!("up".parse::<MarketScenario>().unwrap(), MarketScenario::Uptrend);
        assert!("crash".parse::<MarketScenario>().is_err());
    }
}
