//! Exchange source adapters consumed by the monitor.
//!
//! The core only depends on two capabilities: historical candle page
//! retrieval (a Binance-style REST endpoint) and a live trade stream (a
//! Coinbase-style websocket match feed). Vendor wire formats stay inside
//! this crate.

pub mod binance;
pub mod coinbase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use goose_core::{Candle, Interval, Symbol};

pub use binance::BinanceClient;
pub use coinbase::{FeedMessage, MatchEvent, MatchFeed};

/// Convenience alias for adapter results.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Common error taxonomy at the exchange boundary. Every variant is fatal
/// within its phase: stream errors end the live session, REST errors end the
/// backtest run.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Connection or dial failure (network, TLS, timeouts).
    #[error("transport error: {0}")]
    Transport(String),
    /// The venue sent a frame or payload the adapter cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The venue reported a first-class API error in its response body.
    #[error("the exchange reported an API error (code: {code}, message: {message})")]
    Api { code: i64, message: String },
    /// The venue answered with a non-2xx status.
    #[error("server responded with a {status} status code")]
    Http { status: u16 },
}

/// One candle-shaped row from a historical page, exactly as the venue
/// reported it.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoricalCandle {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub count: u32,
}

impl HistoricalCandle {
    /// Convert the venue row into an engine candle at the given granularity.
    #[must_use]
    pub fn to_candle(&self, interval: Interval) -> Candle {
        Candle::from_aggregates(
            self.start,
            interval.as_duration(),
            self.open,
            self.high,
            self.low,
            self.close,
            self.count,
        )
    }
}

/// Retrieves historical candle pages from a venue's REST API.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// The venue's spelling of a market symbol (e.g. `BTCUSD`).
    fn market_symbol(&self, asset: &str, quote: &str) -> Symbol;

    /// Fetch up to `limit` candles of `interval` within `[start, end]`.
    async fn retrieve_candles(
        &self,
        market: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> ExchangeResult<Vec<HistoricalCandle>>;
}
