//! Fan-in of trades across every supported granularity.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use goose_core::{
    service::completed_signal, Candle, ClosedCandles, Interval, LifecycleSignal, Price, Service,
    ServiceError,
};

use crate::{CandleStore, StoreError};

struct Stores {
    one_min: CandleStore,
    five_min: CandleStore,
    fifteen_min: CandleStore,
}

#[derive(Default)]
struct State {
    running: bool,
    stores: Option<Stores>,
}

/// Drives one [`CandleStore`] per supported granularity.
///
/// A single lock is held across all three sub-appends so observers always
/// see a consistent per-trade snapshot; the critical section is three O(1)
/// operations.
#[derive(Default)]
pub struct CandleService {
    state: Mutex<State>,
}

impl CandleService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create all three stores atomically from their seed candles. Called by
    /// the monitor once the most recent known trade is available.
    pub fn init(
        &self,
        one_min: Candle,
        five_min: Candle,
        fifteen_min: Candle,
    ) -> Result<(), StoreError> {
        let stores = Stores {
            one_min: CandleStore::new(Interval::OneMinute.as_duration(), one_min)?,
            five_min: CandleStore::new(Interval::FiveMinutes.as_duration(), five_min)?,
            fifteen_min: CandleStore::new(Interval::FifteenMinutes.as_duration(), fifteen_min)?,
        };

        let mut state = self.state.lock().expect("candle service mutex poisoned");
        state.stores = Some(stores);

        info!("candle stores primed for all granularities");

        Ok(())
    }

    /// Whether seed candles have been provided yet.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state
            .lock()
            .expect("candle service mutex poisoned")
            .stores
            .is_some()
    }

    /// Fold a trade into every granularity, in fixed 1m → 5m → 15m order,
    /// and return the set of candles this trade sealed.
    pub fn append(&self, at: DateTime<Utc>, price: Price) -> Result<ClosedCandles, StoreError> {
        let mut state = self.state.lock().expect("candle service mutex poisoned");
        let stores = state.stores.as_mut().ok_or(StoreError::Uninitialized)?;

        let mut closed = ClosedCandles::default();
        if stores.one_min.append(at, price)? {
            closed.one_min = stores.one_min.previous().cloned();
        }
        if stores.five_min.append(at, price)? {
            closed.five_min = stores.five_min.previous().cloned();
        }
        if stores.fifteen_min.append(at, price)? {
            closed.fifteen_min = stores.fifteen_min.previous().cloned();
        }

        Ok(closed)
    }
}

#[async_trait]
impl Service for CandleService {
    fn name(&self) -> &'static str {
        "candle-service"
    }

    async fn start(&self) -> Result<LifecycleSignal, ServiceError> {
        let mut state = self.state.lock().expect("candle service mutex poisoned");
        if state.running {
            return Err(ServiceError::AlreadyRunning);
        }
        state.running = true;

        info!(service = self.name(), "started");

        Ok(completed_signal())
    }

    async fn stop(&self) -> Result<LifecycleSignal, ServiceError> {
        let mut state = self.state.lock().expect("candle service mutex poisoned");
        if !state.running {
            return Err(ServiceError::NotRunning);
        }
        state.running = false;
        // Stores are discarded so a future start primes a fresh session.
        state.stores = None;

        info!(service = self.name(), "stopped");

        Ok(completed_signal())
    }
}
