//! Fundamental data types shared across the entire workspace.

pub mod queue;
pub mod service;

use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use queue::EvictingQueue;
pub use service::{LifecycleSignal, Service, ServiceError};

/// Alias for price precision.
pub type Price = Decimal;
/// Alias used for human-readable market symbols (e.g., `BTCUSD`).
pub type Symbol = String;

/// Candle granularities supported by the engine.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
}

impl Interval {
    /// Convert the interval into a chrono `Duration`.
    #[must_use]
    pub fn as_duration(self) -> Duration {
        match self {
            Self::OneMinute => Duration::minutes(1),
            Self::FiveMinutes => Duration::minutes(5),
            Self::FifteenMinutes => Duration::minutes(15),
        }
    }

    /// Resolve an interval from a period length in minutes.
    #[must_use]
    pub fn from_minutes(minutes: i64) -> Option<Self> {
        match minutes {
            1 => Some(Self::OneMinute),
            5 => Some(Self::FiveMinutes),
            15 => Some(Self::FifteenMinutes),
            _ => None,
        }
    }

    /// Label understood by Binance-style kline endpoints.
    #[must_use]
    pub fn rest_label(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
        }
    }

    /// Align an instant down to the most recent window boundary of this interval.
    #[must_use]
    pub fn window_start(self, at: DateTime<Utc>) -> DateTime<Utc> {
        let span = self.as_duration().num_seconds();
        let aligned = at.timestamp() - at.timestamp().rem_euclid(span);
        Utc.timestamp_opt(aligned, 0)
            .single()
            .unwrap_or_else(|| unreachable!("aligned timestamp is always representable"))
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "1m" | "1min" | "1minute" => Ok(Self::OneMinute),
            "5m" | "5min" | "5minutes" => Ok(Self::FiveMinutes),
            "15m" | "15min" | "15minutes" => Ok(Self::FifteenMinutes),
            other => Err(format!("unsupported interval '{other}'")),
        }
    }
}

/// A single executed trade reported by the source exchange.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Trade {
    pub time: DateTime<Utc>,
    pub price: Price,
}

impl Trade {
    #[must_use]
    pub fn new(time: DateTime<Utc>, price: Price) -> Self {
        Self { time, price }
    }
}

/// Trend detected by a strategy and communicated to the broker.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendSignal {
    None,
    UptrendDetected,
    DowntrendDetected,
}

/// Failure raised when a trade cannot be folded into a candle.
#[derive(Debug, Error, PartialEq)]
pub enum CandleError {
    /// The trade falls past the end of the candle's window.
    #[error("trade at {at} falls outside the candle window ending at {end}")]
    OutOfWindow {
        at: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Aggregated snapshot of trade activity within a single fixed window.
///
/// A candle is created by the first trade of a fresh window, mutated only by
/// [`Candle::append`] for trades inside the same window, and never touched
/// again once its store rolls past it.
#[derive(Clone, Debug, PartialEq)]
pub struct Candle {
    start: DateTime<Utc>,
    duration: Duration,
    open: Price,
    close: Price,
    high: Price,
    low: Price,
    mean: Price,
    total: Price,
    count: u32,
}

impl Candle {
    /// Open a fresh candle seeded with the window's first trade.
    #[must_use]
    pub fn new(start: DateTime<Utc>, duration: Duration, first_price: Price) -> Self {
        Self {
            start,
            duration,
            open: first_price,
            close: first_price,
            high: first_price,
            low: first_price,
            mean: first_price,
            total: first_price,
            count: 1,
        }
    }

    /// Rebuild a sealed candle from venue-reported OHLC aggregates.
    ///
    /// Historical pages expose no per-trade sums, so the mean collapses to
    /// the close while `mean * count == total` still holds.
    #[must_use]
    pub fn from_aggregates(
        start: DateTime<Utc>,
        duration: Duration,
        open: Price,
        high: Price,
        low: Price,
        close: Price,
        count: u32,
    ) -> Self {
        let count = count.max(1);
        Self {
            start,
            duration,
            open,
            close,
            high,
            low,
            mean: close,
            total: close * Decimal::from(count),
            count,
        }
    }

    /// Fold a trade into the candle.
    ///
    /// The trade must have occurred within the window this candle covers;
    /// anything later is rejected with [`CandleError::OutOfWindow`] so the
    /// owning store can roll to a fresh window instead.
    pub fn append(&mut self, at: DateTime<Utc>, price: Price) -> Result<(), CandleError> {
        if at > self.end() {
            return Err(CandleError::OutOfWindow { at, end: self.end() });
        }

        self.close = price;
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        self.total += price;
        self.count += 1;
        self.mean = self.total / Decimal::from(self.count);

        Ok(())
    }

    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// The final instant covered by the candle's window.
    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.duration
    }

    #[must_use]
    pub fn open(&self) -> Price {
        self.open
    }

    #[must_use]
    pub fn close(&self) -> Price {
        self.close
    }

    #[must_use]
    pub fn high(&self) -> Price {
        self.high
    }

    #[must_use]
    pub fn low(&self) -> Price {
        self.low
    }

    #[must_use]
    pub fn mean(&self) -> Price {
        self.mean
    }

    #[must_use]
    pub fn total(&self) -> Price {
        self.total
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// The higher of the open and close prices.
    #[must_use]
    pub fn body_top(&self) -> Price {
        self.open.max(self.close)
    }

    /// The lower of the open and close prices.
    #[must_use]
    pub fn body_bottom(&self) -> Price {
        self.open.min(self.close)
    }

    /// Height of the candle body.
    #[must_use]
    pub fn body_size(&self) -> Price {
        self.body_top() - self.body_bottom()
    }

    /// Height of the upper shadow. Negative values indicate a programming
    /// fault, never venue data.
    #[must_use]
    pub fn wick_size(&self) -> Price {
        let size = self.high - self.body_top();
        debug_assert!(size >= Decimal::ZERO, "high drifted below the candle body");
        size
    }

    /// Height of the lower shadow. Negative values indicate a programming
    /// fault, never venue data.
    #[must_use]
    pub fn tail_size(&self) -> Price {
        let size = self.body_bottom() - self.low;
        debug_assert!(size >= Decimal::ZERO, "low drifted above the candle body");
        size
    }
}

/// The set of candles sealed by a single trade append, one slot per
/// granularity. Slots are `None` when that granularity's window survived.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClosedCandles {
    pub one_min: Option<Candle>,
    pub five_min: Option<Candle>,
    pub fifteen_min: Option<Candle>,
}

impl ClosedCandles {
    /// Returns true when no granularity rolled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.one_min.is_none() && self.five_min.is_none() && self.fifteen_min.is_none()
    }
}

/// Callback seam for components that want to observe sealed candles.
///
/// Handlers run synchronously under the dispatching service's lock and in
/// registration order; they must not call back into registration or trade
/// ingestion.
pub trait CandleCloseHandler: Send {
    fn on_candle_close(&mut self, candle: &Candle);
}
