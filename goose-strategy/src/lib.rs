//! Candle-close trading strategies.
//!
//! Strategies implement [`CandleCloseHandler`] and are registered with the
//! monitor for the granularity they watch. The moving-average crossover
//! exemplar feeds detected trends straight into the broker; the hammer
//! detector only reports what it sees.

mod hammer;
mod moving_average;

use thiserror::Error;

pub use hammer::HammerPattern;
pub use moving_average::{MaCrossConfig, MovingAverageCross};

/// Result alias used within strategy implementations.
pub type StrategyResult<T> = Result<T, StrategyError>;

/// Failure variants surfaced by strategies.
#[derive(Debug, Error, PartialEq)]
pub enum StrategyError {
    /// Raised when a strategy's configuration cannot be used as provided.
    #[error("configuration is invalid: {0}")]
    InvalidConfig(String),
}
