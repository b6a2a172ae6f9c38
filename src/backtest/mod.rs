pub mod synthetic;

pub use synthetic::{MarketScenario, SyntheticFeed};
