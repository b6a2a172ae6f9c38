// Core modules
pub mod api;
pub mod backtest;
pub mod execution;
pub mod models;
pub mod persistence;
pub mod scheduler;
pub mod settings;
pub mod status;
pub mod strategy;

// Re-export commonly used types
pub use models::*;
pub use scheduler::{Clock, CycleReport, RunStats, Scheduler};
pub use settings::BotConfig;
