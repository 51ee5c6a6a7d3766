//! The match monitor: single driver of the candle pipeline.
//!
//! In live mode the monitor owns the websocket session against the match
//! feed, primes the candle stores from the most recent known trade, and
//! feeds every subsequent trade into the candle service. In backtest mode it
//! synthesizes the identical closed-candle stream from historical pages.
//! Either way, sealed candles fan out to registered handlers under the
//! monitor's lock, in granularity order.

mod backtest;
mod live;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use goose_candles::{CandleService, StoreError};
use goose_core::{
    Candle, CandleCloseHandler, ClosedCandles, Interval, LifecycleSignal, Service, ServiceError,
    Symbol, Trade,
};
use goose_exchange::{coinbase, ExchangeError};
use goose_writer::{Category, RecordSink};

/// Failures that end a monitoring session or a backtest run.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Progress of the live session's connection state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MonitorState {
    /// No connection has been attempted yet.
    Disconnected,
    /// A connection to the match feed is being established.
    Connecting,
    /// The transport handshake has completed.
    Connected,
    /// The feed confirmed the channel subscriptions for the target market.
    Subscribed,
    /// The candle stores are primed from the last known trade; trade
    /// messages are now being processed.
    Ready,
}

/// Configuration for a monitoring session.
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Base asset symbol (e.g. `BTC`). The quote is always USD.
    pub asset: Symbol,
    /// Websocket endpoint of the match feed.
    pub feed_url: String,
}

impl MonitorConfig {
    #[must_use]
    pub fn new(asset: impl Into<Symbol>) -> Self {
        Self {
            asset: asset.into(),
            feed_url: coinbase::FEED_URL.to_string(),
        }
    }
}

#[derive(Default)]
struct HandlerSet {
    one_min: Vec<Box<dyn CandleCloseHandler>>,
    five_min: Vec<Box<dyn CandleCloseHandler>>,
    fifteen_min: Vec<Box<dyn CandleCloseHandler>>,
    any: Vec<Box<dyn CandleCloseHandler>>,
}

struct MonitorInner {
    config: MonitorConfig,
    candles: Arc<CandleService>,
    writer: Arc<dyn RecordSink>,
    state: Mutex<MonitorState>,
    handlers: Mutex<HandlerSet>,
}

struct LiveRuntime {
    kill_tx: mpsc::Sender<bool>,
    stopped_rx: LifecycleSignal,
}

/// Handle to the monitor service.
pub struct MonitorService {
    inner: Arc<MonitorInner>,
    runtime: Mutex<Option<LiveRuntime>>,
}

impl MonitorService {
    /// Build a monitor that drives `candles` and reports closing prices to
    /// `writer`.
    #[must_use]
    pub fn new(
        config: MonitorConfig,
        candles: Arc<CandleService>,
        writer: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                candles,
                writer,
                state: Mutex::new(MonitorState::Disconnected),
                handlers: Mutex::new(HandlerSet::default()),
            }),
            runtime: Mutex::new(None),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> MonitorState {
        *self.inner.state.lock().expect("monitor state mutex poisoned")
    }

    /// Register a handler for sealed one-minute candles.
    pub fn register_one_min_close_handler(&self, handler: Box<dyn CandleCloseHandler>) {
        self.inner.register(Interval::OneMinute, handler);
    }

    /// Register a handler for sealed five-minute candles.
    pub fn register_five_min_close_handler(&self, handler: Box<dyn CandleCloseHandler>) {
        self.inner.register(Interval::FiveMinutes, handler);
    }

    /// Register a handler for sealed fifteen-minute candles.
    pub fn register_fifteen_min_close_handler(&self, handler: Box<dyn CandleCloseHandler>) {
        self.inner.register(Interval::FifteenMinutes, handler);
    }

    /// Register a handler for every sealed candle regardless of granularity.
    pub fn register_candle_close_handler(&self, handler: Box<dyn CandleCloseHandler>) {
        let mut handlers = self.inner.handlers.lock().expect("handler mutex poisoned");
        handlers.any.push(handler);
    }

    /// Register a granularity-specific handler by interval.
    pub fn register_close_handler(
        &self,
        interval: Interval,
        handler: Box<dyn CandleCloseHandler>,
    ) {
        self.inner.register(interval, handler);
    }

    /// Dispatch a set of sealed candles to the registered handlers. Exposed
    /// for the backtest driver, which shares the live fan-out path.
    pub fn process_closed_candles(&self, closed: &ClosedCandles) {
        self.inner.process_closed_candles(closed);
    }
}

impl MonitorInner {
    fn register(&self, interval: Interval, handler: Box<dyn CandleCloseHandler>) {
        let mut handlers = self.handlers.lock().expect("handler mutex poisoned");
        match interval {
            Interval::OneMinute => handlers.one_min.push(handler),
            Interval::FiveMinutes => handlers.five_min.push(handler),
            Interval::FifteenMinutes => handlers.fifteen_min.push(handler),
        }
    }

    fn set_state(&self, next: MonitorState) {
        *self.state.lock().expect("monitor state mutex poisoned") = next;
    }

    fn state(&self) -> MonitorState {
        *self.state.lock().expect("monitor state mutex poisoned")
    }

    /// Seed all three candle stores from the most recent known trade. Each
    /// seed window starts at the trade's time aligned down to that
    /// granularity's boundary so live windows line up with venue history.
    fn prime(&self, trade: Trade) -> Result<(), StoreError> {
        let seed = |interval: Interval| {
            Candle::new(
                interval.window_start(trade.time),
                interval.as_duration(),
                trade.price,
            )
        };

        self.candles.init(
            seed(Interval::OneMinute),
            seed(Interval::FiveMinutes),
            seed(Interval::FifteenMinutes),
        )?;

        info!(price = %trade.price, time = %trade.time, "candle stores primed from last known trade");

        Ok(())
    }

    /// Fold a trade into the candle service and fan out whatever sealed.
    fn ingest(&self, trade: Trade) -> Result<(), StoreError> {
        let closed = self.candles.append(trade.time, trade.price)?;
        self.process_closed_candles(&closed);
        Ok(())
    }

    /// Invoke handlers for each sealed candle, holding the handler lock so
    /// subscribers observe closes in timestamp order without interleaving.
    /// Granularity lists run first (1m, 5m, 15m), then the generic list
    /// sees each sealed candle in the same order.
    fn process_closed_candles(&self, closed: &ClosedCandles) {
        if closed.is_empty() {
            return;
        }

        // Record the one-minute closing price ahead of handler dispatch so
        // the price row always precedes any trade the close triggers.
        if let Some(candle) = &closed.one_min {
            let _ = self
                .writer
                .write(candle.end(), Category::ClosingPrice, candle.close());
        }

        let mut handlers = self.handlers.lock().expect("handler mutex poisoned");

        if let Some(candle) = &closed.one_min {
            for handler in handlers.one_min.iter_mut() {
                handler.on_candle_close(candle);
            }
        }
        if let Some(candle) = &closed.five_min {
            for handler in handlers.five_min.iter_mut() {
                handler.on_candle_close(candle);
            }
        }
        if let Some(candle) = &closed.fifteen_min {
            for handler in handlers.fifteen_min.iter_mut() {
                handler.on_candle_close(candle);
            }
        }

        for candle in [&closed.one_min, &closed.five_min, &closed.fifteen_min]
            .into_iter()
            .flatten()
        {
            for handler in handlers.any.iter_mut() {
                handler.on_candle_close(candle);
            }
        }
    }
}

#[async_trait]
impl Service for MonitorService {
    fn name(&self) -> &'static str {
        "monitor-service"
    }

    async fn start(&self) -> Result<LifecycleSignal, ServiceError> {
        let mut runtime = self.runtime.lock().expect("monitor runtime mutex poisoned");
        if runtime.is_some() {
            return Err(ServiceError::AlreadyRunning);
        }

        let (kill_tx, kill_rx) = mpsc::channel(1);
        let (stopped_tx, stopped_rx) = oneshot::channel();
        tokio::spawn(live::run(self.inner.clone(), kill_rx, stopped_tx));

        *runtime = Some(LiveRuntime {
            kill_tx,
            stopped_rx,
        });

        info!(service = self.name(), asset = %self.inner.config.asset, "started");

        Ok(goose_core::service::completed_signal())
    }

    async fn stop(&self) -> Result<LifecycleSignal, ServiceError> {
        let runtime = {
            let mut guard = self.runtime.lock().expect("monitor runtime mutex poisoned");
            guard.take().ok_or(ServiceError::NotRunning)?
        };

        debug!(service = self.name(), "stopping");
        let _ = runtime.kill_tx.send(true).await;

        Ok(runtime.stopped_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use goose_writer::WriteError;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    pub(crate) struct NullSink;

    impl RecordSink for NullSink {
        fn write(
            &self,
            _timestamp: DateTime<Utc>,
            _category: Category,
            _value: Decimal,
        ) -> Result<(), WriteError> {
            Ok(())
        }
    }

    struct RecordingHandler {
        label: &'static str,
        seen: Arc<Mutex<Vec<(&'static str, i64)>>>,
    }

    impl CandleCloseHandler for RecordingHandler {
        fn on_candle_close(&mut self, candle: &Candle) {
            self.seen
                .lock()
                .unwrap()
                .push((self.label, candle.duration().num_minutes()));
        }
    }

    fn monitor() -> MonitorService {
        MonitorService::new(
            MonitorConfig::new("BTC"),
            Arc::new(CandleService::new()),
            Arc::new(NullSink),
        )
    }

    #[test]
    fn dispatch_runs_granularity_lists_before_the_generic_list() {
        let monitor = monitor();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = |label| {
            Box::new(RecordingHandler {
                label,
                seen: seen.clone(),
            })
        };

        monitor.register_one_min_close_handler(handler("1m"));
        monitor.register_five_min_close_handler(handler("5m"));
        monitor.register_fifteen_min_close_handler(handler("15m"));
        monitor.register_candle_close_handler(handler("any"));

        let start: DateTime<Utc> = "2020-01-01T00:00:00Z".parse().unwrap();
        let closed = ClosedCandles {
            one_min: Some(Candle::new(start, Duration::minutes(1), dec!(1))),
            five_min: Some(Candle::new(start, Duration::minutes(5), dec!(1))),
            fifteen_min: Some(Candle::new(start, Duration::minutes(15), dec!(1))),
        };
        monitor.process_closed_candles(&closed);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("1m", 1),
                ("5m", 5),
                ("15m", 15),
                ("any", 1),
                ("any", 5),
                ("any", 15),
            ]
        );
    }

    #[test]
    fn dispatch_skips_absent_granularities() {
        let monitor = monitor();
        let seen = Arc::new(Mutex::new(Vec::new()));
        monitor.register_five_min_close_handler(Box::new(RecordingHandler {
            label: "5m",
            seen: seen.clone(),
        }));
        monitor.register_candle_close_handler(Box::new(RecordingHandler {
            label: "any",
            seen: seen.clone(),
        }));

        let start: DateTime<Utc> = "2020-01-01T00:00:00Z".parse().unwrap();
        let closed = ClosedCandles {
            one_min: Some(Candle::new(start, Duration::minutes(1), dec!(1))),
            ..Default::default()
        };
        monitor.process_closed_candles(&closed);

        assert_eq!(*seen.lock().unwrap(), vec![("any", 1)]);
    }

    #[test]
    fn handlers_can_register_for_a_configured_interval() {
        let monitor = monitor();
        let seen = Arc::new(Mutex::new(Vec::new()));
        monitor.register_close_handler(
            Interval::FifteenMinutes,
            Box::new(RecordingHandler {
                label: "15m",
                seen: seen.clone(),
            }),
        );

        let start: DateTime<Utc> = "2020-01-01T00:00:00Z".parse().unwrap();
        let closed = ClosedCandles {
            fifteen_min: Some(Candle::new(start, Duration::minutes(15), dec!(1))),
            ..Default::default()
        };
        monitor.process_closed_candles(&closed);

        assert_eq!(*seen.lock().unwrap(), vec![("15m", 15)]);
    }
}
