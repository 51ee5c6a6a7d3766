//! Append-only candle series at a single granularity.

use chrono::{DateTime, Duration, Utc};

use goose_core::{Candle, Price};

use crate::StoreError;

/// An ordered, gap-free series of candles sharing one duration.
///
/// The store tracks the open window through two cursors (`last_start`,
/// `last_end`). A trade past `last_end` seals the tip and opens a fresh
/// window starting exactly where the previous one ended; a trade before
/// `last_start` is rejected. Interior windows with no trades are never
/// synthesized — the series simply rolls past them.
#[derive(Debug)]
pub struct CandleStore {
    interval: Duration,
    candles: Vec<Candle>,
    last_start: DateTime<Utc>,
    last_end: DateTime<Utc>,
}

impl CandleStore {
    /// Create a store seeded with its first candle. The seed must cover the
    /// store's interval; a mismatch is a configuration fault.
    pub fn new(interval: Duration, initial: Candle) -> Result<Self, StoreError> {
        if initial.duration() != interval {
            return Err(StoreError::IntervalMismatch {
                expected: interval,
                actual: initial.duration(),
            });
        }

        let last_start = initial.start();
        let last_end = initial.end();

        Ok(Self {
            interval,
            candles: vec![initial],
            last_start,
            last_end,
        })
    }

    /// Fold a trade into the series.
    ///
    /// Returns `true` when the trade crossed the open window's end and
    /// rolled the store onto a fresh candle seeded with this trade's price.
    /// The sealed candle is then available through [`CandleStore::previous`].
    pub fn append(&mut self, at: DateTime<Utc>, price: Price) -> Result<bool, StoreError> {
        if at < self.last_start {
            return Err(StoreError::BackdatedTrade {
                at,
                start: self.last_start,
            });
        }

        if at > self.last_end {
            // The new window starts where the previous one ended, not at the
            // trade's own timestamp, and this trade becomes its seed.
            let candle = Candle::new(self.last_end, self.interval, price);
            self.last_start = candle.start();
            self.last_end = candle.end();
            self.candles.push(candle);
            return Ok(true);
        }

        let tip = self
            .candles
            .last_mut()
            .unwrap_or_else(|| unreachable!("store always holds at least its seed candle"));
        tip.append(at, price)?;

        Ok(false)
    }

    /// The candle currently being built.
    #[must_use]
    pub fn current(&self) -> &Candle {
        self.candles
            .last()
            .unwrap_or_else(|| unreachable!("store always holds at least its seed candle"))
    }

    /// The most recently sealed candle, if any window has closed yet.
    #[must_use]
    pub fn previous(&self) -> Option<&Candle> {
        self.candles.len().checked_sub(2).map(|i| &self.candles[i])
    }

    /// Every candle accumulated this session, oldest first.
    #[must_use]
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }
}
