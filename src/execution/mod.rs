// Price feed, order execution and the position ledger
pub mod gateway;
pub mod position_ledger;
pub mod price_feed;

pub use gateway::{ExecutionError, ExecutionGateway, OrderVenue};
pub use position_ledger::{LedgerError, LedgerState, LedgerSummary, PositionLedger};
pub use price_feed::{FeedError, PriceFeed};
