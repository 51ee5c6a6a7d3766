//! Double moving-average crossover strategy.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info};

use goose_broker::BrokerService;
use goose_core::{Candle, CandleCloseHandler, EvictingQueue, Interval, Price, TrendSignal};

use crate::{StrategyError, StrategyResult};

/// Configuration for [`MovingAverageCross`].
#[derive(Clone, Copy, Debug)]
pub struct MaCrossConfig {
    /// Candle granularity the strategy subscribes to.
    pub interval: Interval,
    /// Length of the short moving average, in periods.
    pub short_len: u32,
    /// Length of the long moving average, in periods.
    pub long_len: u32,
    /// Use exponential rather than simple moving averages.
    pub exponential: bool,
}

impl Default for MaCrossConfig {
    fn default() -> Self {
        Self {
            interval: Interval::FiveMinutes,
            short_len: 5,
            long_len: 15,
            exponential: false,
        }
    }
}

impl MaCrossConfig {
    fn validate(&self) -> StrategyResult<()> {
        if self.short_len < 2 {
            return Err(StrategyError::InvalidConfig(
                "short moving average length must be at least 2".into(),
            ));
        }
        if self.long_len <= self.short_len {
            return Err(StrategyError::InvalidConfig(
                "long moving average length must exceed the short length".into(),
            ));
        }
        Ok(())
    }
}

/// Watches closed candles at one granularity, maintains short and long
/// moving averages, and reports a trend to the broker whenever the short
/// average crosses the long one.
pub struct MovingAverageCross {
    cfg: MaCrossConfig,
    broker: Arc<BrokerService>,
    candles: EvictingQueue<Candle>,
    last_signal: TrendSignal,
    sma_short: Option<Decimal>,
    sma_short_prev: Option<Decimal>,
    sma_long: Option<Decimal>,
    sma_long_prev: Option<Decimal>,
    ema_short: Option<Decimal>,
    ema_short_prev: Option<Decimal>,
    ema_long: Option<Decimal>,
    ema_long_prev: Option<Decimal>,
}

impl MovingAverageCross {
    /// Build the strategy, validating its configuration.
    pub fn new(cfg: MaCrossConfig, broker: Arc<BrokerService>) -> StrategyResult<Self> {
        cfg.validate()?;

        info!(
            interval = cfg.interval.rest_label(),
            short = cfg.short_len,
            long = cfg.long_len,
            exponential = cfg.exponential,
            "moving-average strategy initialized"
        );

        Ok(Self {
            cfg,
            broker,
            // One extra slot so the long average always has a previous value
            // to compare against.
            candles: EvictingQueue::new(cfg.long_len as usize + 1),
            last_signal: TrendSignal::None,
            sma_short: None,
            sma_short_prev: None,
            sma_long: None,
            sma_long_prev: None,
            ema_short: None,
            ema_short_prev: None,
            ema_long: None,
            ema_long_prev: None,
        })
    }

    /// The granularity this strategy should be registered for.
    #[must_use]
    pub fn interval(&self) -> Interval {
        self.cfg.interval
    }

    /// The most recent signal handed to the broker.
    #[must_use]
    pub fn last_signal(&self) -> TrendSignal {
        self.last_signal
    }

    /// Arithmetic mean of the most recent `lookback` closes.
    fn simple_moving_average(&self, lookback: u32) -> Decimal {
        let len = self.candles.len();
        let first = len - lookback as usize;
        let mut total = Decimal::ZERO;
        for index in first..len {
            if let Some(candle) = self.candles.get(index) {
                total += candle.close();
            }
        }
        total / Decimal::from(lookback)
    }

    /// One EMA step: `prev + factor * (close - prev)` with the smoothing
    /// factor `2 / (periods + 1)`.
    fn exponential_moving_average(close: Price, prev: Decimal, periods: u32) -> Decimal {
        let factor = Decimal::from(2) / Decimal::from(periods + 1);
        prev + factor * (close - prev)
    }

    /// Advance the short or long average pair after a new close.
    ///
    /// The SMA is always maintained; the EMA lags it by one period because
    /// its first step seeds from the previously computed SMA.
    fn advance(
        &mut self,
        close: Price,
        lookback: u32,
        seen: u32,
    ) -> (Option<Decimal>, Option<Decimal>, Option<Decimal>, Option<Decimal>) {
        if seen < lookback {
            return (None, None, None, None);
        }

        let sma_prev = if lookback == self.cfg.short_len {
            self.sma_short
        } else {
            self.sma_long
        };
        let sma = Some(self.simple_moving_average(lookback));

        let (mut ema, mut ema_prev) = if lookback == self.cfg.short_len {
            (self.ema_short, self.ema_short_prev)
        } else {
            (self.ema_long, self.ema_long_prev)
        };
        if self.cfg.exponential && seen > lookback {
            let seed = ema.or(sma_prev);
            if let Some(seed) = seed {
                ema_prev = Some(seed);
                ema = Some(Self::exponential_moving_average(close, seed, lookback));
            }
        }

        (sma, sma_prev, ema, ema_prev)
    }

    /// The average pair the crossover decision runs on, per configuration.
    fn selected_averages(
        &self,
    ) -> (Option<Decimal>, Option<Decimal>, Option<Decimal>, Option<Decimal>) {
        if self.cfg.exponential {
            (
                self.ema_short,
                self.ema_short_prev,
                self.ema_long,
                self.ema_long_prev,
            )
        } else {
            (
                self.sma_short,
                self.sma_short_prev,
                self.sma_long,
                self.sma_long_prev,
            )
        }
    }
}

impl CandleCloseHandler for MovingAverageCross {
    fn on_candle_close(&mut self, candle: &Candle) {
        self.candles.add(candle.clone());
        let seen = self.candles.len() as u32;
        let close = candle.close();

        let (sma, sma_prev, ema, ema_prev) = self.advance(close, self.cfg.short_len, seen);
        if sma.is_some() {
            self.sma_short_prev = sma_prev;
            self.sma_short = sma;
            self.ema_short_prev = ema_prev;
            self.ema_short = ema;
        }

        let (sma, sma_prev, ema, ema_prev) = self.advance(close, self.cfg.long_len, seen);
        if sma.is_some() {
            self.sma_long_prev = sma_prev;
            self.sma_long = sma;
            self.ema_long_prev = ema_prev;
            self.ema_long = ema;
        }

        let (Some(ma_short), Some(ma_short_prev), Some(ma_long), Some(ma_long_prev)) =
            self.selected_averages()
        else {
            debug!(
                collected = seen,
                needed = self.cfg.long_len + 1,
                "not warmed up yet; skipping signal detection"
            );
            return;
        };

        // Track the above and below relations separately so a crossover out
        // of a flat stretch (both averages equal) is still observed.
        let short_above_long = ma_short > ma_long;
        let short_above_long_prev = ma_short_prev > ma_long_prev;
        let short_below_long = ma_short < ma_long;
        let short_below_long_prev = ma_short_prev < ma_long_prev;
        if short_above_long == short_above_long_prev && short_below_long == short_below_long_prev {
            // No crossover; the current position should simply be held.
            return;
        }

        let signal = if short_above_long {
            TrendSignal::UptrendDetected
        } else if short_below_long {
            TrendSignal::DowntrendDetected
        } else {
            return;
        };

        info!(
            short = %ma_short,
            long = %ma_long,
            close = %close,
            ?signal,
            "moving-average crossover detected"
        );

        self.broker.signal(signal, close, candle.end());
        self.last_signal = signal;
    }
}
