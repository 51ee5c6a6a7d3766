//! End-to-end backtest: a stub historical source drives the monitor's
//! replay path through strategies, the broker, and the CSV writer.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use goose_broker::{BrokerService, Position};
use goose_candles::CandleService;
use goose_core::{Candle, CandleCloseHandler, Interval, Service};
use goose_exchange::{CandleSource, ExchangeResult, HistoricalCandle};
use goose_monitor::{MonitorConfig, MonitorService};
use goose_strategy::{MaCrossConfig, MovingAverageCross};
use goose_writer::{Category, RecordSink, WriteError, WriterService};

fn instant(value: &str) -> DateTime<Utc> {
    value.parse().unwrap()
}

/// Serves one synthetic day of flat candles: 10,000 USD until 08:00, a jump
/// to 20,000 until 16:00, then a collapse to 5,000.
struct StubSource {
    day: DateTime<Utc>,
    requests: Mutex<Vec<(Interval, DateTime<Utc>, DateTime<Utc>)>>,
}

impl StubSource {
    fn new(day: DateTime<Utc>) -> Self {
        Self {
            day,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn price_at(&self, start: DateTime<Utc>) -> Decimal {
        if start < self.day + Duration::hours(8) {
            dec!(10000)
        } else if start < self.day + Duration::hours(16) {
            dec!(20000)
        } else {
            dec!(5000)
        }
    }
}

#[async_trait]
impl CandleSource for StubSource {
    fn market_symbol(&self, asset: &str, quote: &str) -> String {
        format!("{asset}{quote}")
    }

    async fn retrieve_candles(
        &self,
        _market: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        _limit: usize,
    ) -> ExchangeResult<Vec<HistoricalCandle>> {
        self.requests.lock().unwrap().push((interval, start, end));

        let duration = interval.as_duration();
        let mut rows = Vec::new();
        let mut cursor = start;
        // Venue rows report `end` one millisecond before the next window.
        while cursor + duration - Duration::milliseconds(1) <= end {
            let price = self.price_at(cursor);
            rows.push(HistoricalCandle {
                start: cursor,
                end: cursor + duration - Duration::milliseconds(1),
                open: price,
                high: price,
                low: price,
                close: price,
                volume: dec!(1),
                count: 1,
            });
            cursor += duration;
        }
        Ok(rows)
    }
}

struct NullSink;

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
    seen: Arc<Mutex<Vec<(i64, DateTime<Utc>)>>>,
}

impl CandleCloseHandler for RecordingHandler {
    fn on_candle_close(&mut self, candle: &Candle) {
        self.seen
            .lock()
            .unwrap()
            .push((candle.duration().num_minutes(), candle.end()));
    }
}

#[tokio::test]
async fn the_backtest_walks_twelve_hour_windows_and_matches_granularities() {
    let day = instant("2020-01-01T00:00:00Z");
    let source = StubSource::new(day);
    let monitor = MonitorService::new(
        MonitorConfig::new("BTC"),
        Arc::new(CandleService::new()),
        Arc::new(NullSink),
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    monitor.register_candle_close_handler(Box::new(RecordingHandler { seen: seen.clone() }));

    monitor
        .run_backtest(&source, day, day + Duration::hours(24))
        .await
        .unwrap();

    // Three windows of three granularities each, advancing by 12 hours from
    // the previous start, each trimmed a nanosecond before the next.
    let requests = source.requests.lock().unwrap();
    assert_eq!(requests.len(), 9);
    assert_eq!(
        requests[0],
        (
            Interval::OneMinute,
            day,
            day + Duration::hours(12) - Duration::nanoseconds(1),
        )
    );
    assert_eq!(
        requests[3],
        (
            Interval::OneMinute,
            day + Duration::hours(12),
            day + Duration::hours(24) - Duration::nanoseconds(1),
        )
    );
    // The final window is clamped to the configured end and holds no rows.
    assert_eq!(
        requests[6],
        (
            Interval::OneMinute,
            day + Duration::hours(24),
            day + Duration::hours(24),
        )
    );

    let seen = seen.lock().unwrap();
    let count_of = |minutes: i64| seen.iter().filter(|(m, _)| *m == minutes).count();
    assert_eq!(count_of(1), 1440);
    assert_eq!(count_of(5), 288);
    assert_eq!(count_of(15), 96);

    // A quarter-hour boundary seals all three granularities at once, fanned
    // out finest-first.
    let quarter: Vec<i64> = seen
        .iter()
        .filter(|(_, end)| *end == day + Duration::minutes(15))
        .map(|(minutes, _)| *minutes)
        .collect();
    assert_eq!(quarter, vec![1, 5, 15]);

    // Interior minutes seal only the one-minute window.
    let interior: Vec<i64> = seen
        .iter()
        .filter(|(_, end)| *end == day + Duration::minutes(7))
        .map(|(minutes, _)| *minutes)
        .collect();
    assert_eq!(interior, vec![1]);
}

#[tokio::test]
async fn a_replayed_day_trades_through_the_broker_into_the_csv() {
    let day = instant("2020-01-01T00:00:00Z");
    let source = StubSource::new(day);

    let output_dir = tempfile::tempdir().unwrap();
    let writer = Arc::new(WriterService::new(output_dir.path()));
    writer.start().await.unwrap().await.unwrap();

    let broker = Arc::new(BrokerService::new(writer.clone()));
    broker.set_asset("BTC");
    broker.enable_mock_trading(dec!(1000), dec!(0));
    broker.start().await.unwrap().await.unwrap();

    let monitor = MonitorService::new(
        MonitorConfig::new("BTC"),
        Arc::new(CandleService::new()),
        writer.clone(),
    );
    let strategy = MovingAverageCross::new(MaCrossConfig::default(), broker.clone()).unwrap();
    monitor.register_close_handler(strategy.interval(), Box::new(strategy));

    monitor
        .run_backtest(&source, day, day + Duration::hours(24))
        .await
        .unwrap();

    broker.stop().await.unwrap().await.unwrap();
    writer.stop().await.unwrap().await.unwrap();

    // The jump to 20,000 bought in; the collapse to 5,000 sold back out.
    assert_eq!(broker.position(), Position::Offline);
    let (usd, asset) = broker.holdings();
    assert_eq!(usd, dec!(250));
    assert_eq!(asset, dec!(0));
    assert_eq!(broker.running_gain(), dec!(-750));

    let contents = std::fs::read_to_string(writer.output_path()).unwrap();
    let mut lines = contents.lines();
    assert_eq!(
        lines.next().unwrap(),
        "Timestamp,ClosingPrice,GrossMockEarnings"
    );

    let mut closing_rows = 0;
    let mut earnings: Vec<Decimal> = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split(',').collect();
        assert_eq!(fields.len(), 3);
        if !fields[1].is_empty() {
            closing_rows += 1;
            assert!(fields[2].is_empty());
        } else {
            earnings.push(fields[2].parse().unwrap());
        }
    }

    // One closing-price row per sealed one-minute candle, plus the single
    // realized-gain row from the round trip.
    assert_eq!(closing_rows, 1440);
    assert_eq!(earnings, vec![dec!(-750)]);
}
