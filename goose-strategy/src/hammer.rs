//! Hammer candlestick detection over the one-minute series.

use tracing::{debug, info};

use goose_core::{Candle, CandleCloseHandler, EvictingQueue};
use rust_decimal::Decimal;

/// Number of candles the detector inspects: the lead-in, the prospective
/// hammer, and the confirmation candle.
const CANDLE_COUNT: usize = 3;

/// Watches one-minute candles for a hammer followed by a confirming close —
/// a potential bottom-out. Detection is reported but not traded on.
pub struct HammerPattern {
    one_min_candles: EvictingQueue<Candle>,
    detections: u32,
}

impl Default for HammerPattern {
    fn default() -> Self {
        Self::new()
    }
}

impl HammerPattern {
    #[must_use]
    pub fn new() -> Self {
        Self {
            one_min_candles: EvictingQueue::new(CANDLE_COUNT),
            detections: 0,
        }
    }

    /// How many confirmed hammers have been observed so far.
    #[must_use]
    pub fn detections(&self) -> u32 {
        self.detections
    }

    fn is_hammer_scenario(&self) -> bool {
        if self.one_min_candles.len() != CANDLE_COUNT {
            debug!(
                collected = self.one_min_candles.len(),
                needed = CANDLE_COUNT,
                "skipping hammer detection; not enough candles have closed"
            );
            return false;
        }

        let Some(middle) = self.one_min_candles.get(1) else {
            return false;
        };
        let Some(last) = self.one_min_candles.get(2) else {
            return false;
        };

        // A hammer carries a lower shadow at least twice its body and closes
        // at or above its open; the following candle must close above the
        // hammer's low to confirm the bottom-out.
        let tail_dwarfs_body = middle.tail_size() >= middle.body_size() * Decimal::from(2);
        let closed_upward = middle.close() >= middle.open();
        let confirmed = last.close() > middle.low();

        tail_dwarfs_body && closed_upward && confirmed
    }
}

impl CandleCloseHandler for HammerPattern {
    fn on_candle_close(&mut self, candle: &Candle) {
        self.one_min_candles.add(candle.clone());

        if self.is_hammer_scenario() {
            self.detections += 1;
            info!(
                low = %candle.low(),
                close = %candle.close(),
                "hammer detected and confirmed; buy opportunity"
            );
        }
    }
}
