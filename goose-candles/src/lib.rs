//! Candle aggregation pipeline.
//!
//! [`CandleStore`] keeps an append-only series of candles at one granularity
//! and owns the window-boundary logic; [`CandleService`] fans a trade into
//! all three supported granularities under a single lock and reports which
//! windows the trade sealed.

mod service;
mod store;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use goose_core::CandleError;

pub use service::CandleService;
pub use store::CandleStore;

/// Failures raised by the candle store and service.
#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    /// The trade predates the currently open window. Closed-out candles are
    /// immutable, so this indicates a source-ordering violation.
    #[error("trade at {at} predates the open window starting at {start}")]
    BackdatedTrade {
        at: DateTime<Utc>,
        start: DateTime<Utc>,
    },
    /// The seed candle does not cover the store's configured interval.
    #[error("initial candle duration {actual} does not match the store interval {expected}")]
    IntervalMismatch { expected: Duration, actual: Duration },
    /// The candle service has not been primed with seed candles yet.
    #[error("candle stores have not been initialized")]
    Uninitialized,
    #[error(transparent)]
    Candle(#[from] CandleError),
}
