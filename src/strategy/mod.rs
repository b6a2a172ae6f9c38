// Entry rules and the exit/entry decision engine
pub mod entry;
pub mod rules;

pub use entry::{AlwaysEntry, DipEntry};
pub use rules::{Decision, Observation, RuleEngine};

use std::fmt::Debug;

/// Decides whether a flat book should open a position
///
/// Implementations must be pure: same inputs, same answer.
pub trait EntryRule: Debug + Send + Sync {
    /// `reference_price` is the last fill price, or the last observed price
    /// when nothing has traded yet
    fn should_enter(&self, price: f64, reference_price: Option<f64>) -> bool;

    /// Get rule name
    fn name(&self) -> &str;
}
