//! Signal-driven position management with simulated trade execution.
//!
//! Strategies report detected trends here; the broker decides whether to
//! enter or exit a position, executes the trade against a mock ledger, and
//! reports realized gains to the writer.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};

use goose_core::{
    service::completed_signal, LifecycleSignal, Price, Service, ServiceError, Symbol, TrendSignal,
};
use goose_writer::{Category, RecordSink};

/// The broker's holdings-qualified state with respect to the asset.
///
/// `Buying` and `Selling` are reserved for future asynchronous execution;
/// the mock path transitions directly between `Waiting` and `Holding`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Position {
    Offline,
    Buying,
    Selling,
    Holding,
    Waiting,
}

struct State {
    position: Position,
    asset: Symbol,
    mock_trading: bool,
    fee_rate: Decimal,
    usd: Decimal,
    usd_init: Decimal,
    usd_gain: Decimal,
    asset_qty: Decimal,
}

impl Default for State {
    fn default() -> Self {
        Self {
            position: Position::Offline,
            asset: Symbol::new(),
            mock_trading: false,
            fee_rate: Decimal::ZERO,
            usd: Decimal::ZERO,
            usd_init: Decimal::ZERO,
            usd_gain: Decimal::ZERO,
            asset_qty: Decimal::ZERO,
        }
    }
}

/// Receives trend signals and operates the position state machine.
pub struct BrokerService {
    state: Mutex<State>,
    sink: Arc<dyn RecordSink>,
}

impl BrokerService {
    /// Build a broker that reports realized gains to the provided sink.
    #[must_use]
    pub fn new(sink: Arc<dyn RecordSink>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            sink,
        }
    }

    /// Tell the broker which asset it trades. Normally the same asset the
    /// monitor watches. Call before `start`.
    pub fn set_asset(&self, asset: impl Into<Symbol>) {
        let mut state = self.state.lock().expect("broker mutex poisoned");
        state.asset = asset.into();
    }

    /// Switch on the mock trade executor, funding it with `init_usd` and
    /// charging `fee_rate` (a fraction of gross) per executed trade.
    pub fn enable_mock_trading(&self, init_usd: Decimal, fee_rate: Decimal) {
        let mut state = self.state.lock().expect("broker mutex poisoned");
        state.usd = init_usd;
        state.usd_init = init_usd;
        state.usd_gain = Decimal::ZERO;
        state.fee_rate = fee_rate;
        state.mock_trading = true;
    }

    /// Switch off the mock trade executor.
    pub fn disable_mock_trading(&self) {
        let mut state = self.state.lock().expect("broker mutex poisoned");
        state.mock_trading = false;
    }

    /// Process a trend detected by a strategy. Signals are handled in
    /// arrival order under the broker lock; combinations other than
    /// buy-while-waiting and sell-while-holding are no-ops.
    pub fn signal(&self, signal: TrendSignal, price: Price, at: DateTime<Utc>) {
        let mut state = self.state.lock().expect("broker mutex poisoned");

        if !state.mock_trading {
            debug!(?signal, %price, "ignoring signal; mock trading is disabled");
            return;
        }

        match (signal, state.position) {
            (TrendSignal::UptrendDetected, Position::Waiting) => {
                let fee = state.usd * state.fee_rate;
                state.asset_qty = state.usd / price - fee;
                state.usd = Decimal::ZERO;
                state.position = Position::Holding;

                info!(
                    asset = %state.asset,
                    holdings = %state.asset_qty,
                    %fee,
                    %price,
                    "mock trade executed; position entered"
                );
            }
            (TrendSignal::DowntrendDetected, Position::Holding) => {
                let fee = state.asset_qty * state.fee_rate;
                state.usd = state.asset_qty * price - fee;
                state.asset_qty = Decimal::ZERO;
                state.position = Position::Waiting;
                state.usd_gain = state.usd - state.usd_init;

                info!(
                    asset = %state.asset,
                    usd = %state.usd,
                    %fee,
                    %price,
                    running_gain = %state.usd_gain,
                    "mock trade executed; position exited"
                );

                // Write failures are logged by the sink and are non-fatal.
                let _ = self.sink.write(at, Category::GrossMockEarnings, state.usd_gain);
            }
            _ => {
                debug!(?signal, position = ?state.position, "signal requires no action");
            }
        }
    }

    /// Current position, for tests and user interfaces.
    #[must_use]
    pub fn position(&self) -> Position {
        self.state.lock().expect("broker mutex poisoned").position
    }

    /// Current `(usd, asset)` holdings.
    #[must_use]
    pub fn holdings(&self) -> (Decimal, Decimal) {
        let state = self.state.lock().expect("broker mutex poisoned");
        (state.usd, state.asset_qty)
    }

    /// Cumulative USD delta from the initial seed, realized on exit.
    #[must_use]
    pub fn running_gain(&self) -> Decimal {
        self.state.lock().expect("broker mutex poisoned").usd_gain
    }
}

#[async_trait]
impl Service for BrokerService {
    fn name(&self) -> &'static str {
        "broker-service"
    }

    async fn start(&self) -> Result<LifecycleSignal, ServiceError> {
        let mut state = self.state.lock().expect("broker mutex poisoned");
        if state.position != Position::Offline {
            return Err(ServiceError::AlreadyRunning);
        }
        state.position = Position::Waiting;

        info!(service = self.name(), asset = %state.asset, "started");

        Ok(completed_signal())
    }

    async fn stop(&self) -> Result<LifecycleSignal, ServiceError> {
        let mut state = self.state.lock().expect("broker mutex poisoned");
        if state.position == Position::Offline {
            return Err(ServiceError::NotRunning);
        }
        state.position = Position::Offline;

        info!(service = self.name(), "stopped");

        Ok(completed_signal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goose_writer::WriteError;
    use rust_decimal_macros::dec;

    struct CapturingSink {
        records: Mutex<Vec<(DateTime<Utc>, Category, Decimal)>>,
    }

    impl CapturingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(Vec::new()),
            })
        }

        fn records(&self) -> Vec<(DateTime<Utc>, Category, Decimal)> {
            self.records.lock().unwrap().clone()
        }
    }

    impl RecordSink for CapturingSink {
        fn write(
            &self,
            timestamp: DateTime<Utc>,
            category: Category,
            value: Price,
        ) -> Result<(), WriteError> {
            self.records.lock().unwrap().push((timestamp, category, value));
            Ok(())
        }
    }

    fn instant(value: &str) -> DateTime<Utc> {
        value.parse().unwrap()
    }

    #[tokio::test]
    async fn a_full_round_trip_realizes_the_gain() {
        let sink = CapturingSink::new();
        let broker = BrokerService::new(sink.clone());
        broker.set_asset("BTC");
        broker.enable_mock_trading(dec!(1000), dec!(0.001));
        broker.start().await.unwrap().await.unwrap();

        broker.signal(
            TrendSignal::UptrendDetected,
            dec!(100),
            instant("2020-01-01T00:05:00Z"),
        );
        assert_eq!(broker.position(), Position::Holding);
        let (usd, asset) = broker.holdings();
        assert_eq!(usd, dec!(0));
        assert_eq!(asset, dec!(9));

        let exit_at = instant("2020-01-01T00:30:00Z");
        broker.signal(TrendSignal::DowntrendDetected, dec!(110), exit_at);
        assert_eq!(broker.position(), Position::Waiting);
        let (usd, asset) = broker.holdings();
        assert_eq!(usd, dec!(989.991));
        assert_eq!(asset, dec!(0));
        assert_eq!(broker.running_gain(), dec!(-10.009));

        assert_eq!(
            sink.records(),
            vec![(exit_at, Category::GrossMockEarnings, dec!(-10.009))]
        );
    }

    #[tokio::test]
    async fn mismatched_signal_position_pairs_are_no_ops() {
        let sink = CapturingSink::new();
        let broker = BrokerService::new(sink.clone());
        broker.enable_mock_trading(dec!(1000), dec!(0.001));
        broker.start().await.unwrap().await.unwrap();

        // Selling without holding anything changes nothing.
        broker.signal(
            TrendSignal::DowntrendDetected,
            dec!(100),
            instant("2020-01-01T00:05:00Z"),
        );
        assert_eq!(broker.position(), Position::Waiting);
        assert_eq!(broker.holdings(), (dec!(1000), dec!(0)));

        // A second buy while already holding changes nothing.
        broker.signal(
            TrendSignal::UptrendDetected,
            dec!(100),
            instant("2020-01-01T00:10:00Z"),
        );
        broker.signal(
            TrendSignal::UptrendDetected,
            dec!(120),
            instant("2020-01-01T00:15:00Z"),
        );
        assert_eq!(broker.position(), Position::Holding);
        assert_eq!(broker.holdings(), (dec!(0), dec!(9)));

        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn signals_are_ignored_without_mock_trading() {
        let sink = CapturingSink::new();
        let broker = BrokerService::new(sink.clone());
        broker.start().await.unwrap().await.unwrap();

        broker.signal(
            TrendSignal::UptrendDetected,
            dec!(100),
            instant("2020-01-01T00:05:00Z"),
        );

        assert_eq!(broker.position(), Position::Waiting);
        assert_eq!(broker.holdings(), (dec!(0), dec!(0)));
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn lifecycle_transitions_are_guarded() {
        let broker = BrokerService::new(CapturingSink::new());

        assert_eq!(broker.stop().await.unwrap_err(), ServiceError::NotRunning);
        broker.start().await.unwrap().await.unwrap();
        assert_eq!(
            broker.start().await.unwrap_err(),
            ServiceError::AlreadyRunning
        );
        broker.stop().await.unwrap().await.unwrap();
        assert_eq!(broker.position(), Position::Offline);
    }
}
