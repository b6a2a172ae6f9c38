pub mod kraken;

pub use kraken::{KrakenClient, KrakenCredentials, KRAKEN_API_BASE};
