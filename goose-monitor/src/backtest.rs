//! Historical replay through the live fan-out path.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use goose_core::{ClosedCandles, Interval};
use goose_exchange::{CandleSource, HistoricalCandle};

use crate::{MonitorError, MonitorService};

/// Upper bound on candles requested per page; a 12-hour window of one-minute
/// candles holds 720 rows, well under typical venue limits.
const PAGE_LIMIT: usize = 1000;

/// Span of one backtest page.
fn window_span() -> Duration {
    Duration::hours(12)
}

impl MonitorService {
    /// Replay `[start, end]` (inclusive) from the historical source,
    /// synthesizing the same closed-candle stream live trading would have
    /// produced and dispatching it to the registered handlers.
    ///
    /// Backtests bypass the websocket state machine entirely.
    pub async fn run_backtest(
        &self,
        source: &dyn CandleSource,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        let market = source.market_symbol(&self.inner.config.asset, "USD");

        info!(%market, %start, %end, "backtest starting");

        let mut cursor = start;
        while cursor <= end {
            // Trim a nanosecond so adjacent windows never double-count a
            // boundary row; the final window is clamped to the configured
            // end and may be partial.
            let window_end = (cursor + window_span() - Duration::nanoseconds(1)).min(end);

            let one_min = source
                .retrieve_candles(&market, Interval::OneMinute, cursor, window_end, PAGE_LIMIT)
                .await?;
            let five_min = source
                .retrieve_candles(&market, Interval::FiveMinutes, cursor, window_end, PAGE_LIMIT)
                .await?;
            let fifteen_min = source
                .retrieve_candles(
                    &market,
                    Interval::FifteenMinutes,
                    cursor,
                    window_end,
                    PAGE_LIMIT,
                )
                .await?;

            debug!(
                %cursor,
                %window_end,
                one_min = one_min.len(),
                five_min = five_min.len(),
                fifteen_min = fifteen_min.len(),
                "replaying window"
            );

            self.replay_window(&one_min, &five_min, &fifteen_min);

            // The next window advances from this window's start, not from
            // its clamped end.
            cursor += window_span();
        }

        info!("backtest finished");

        Ok(())
    }

    /// Walk the one-minute series in order, attaching the five- and
    /// fifteen-minute rows whose windows end at the same instant. The
    /// coarser cursors only ever advance on a match.
    fn replay_window(
        &self,
        one_min: &[HistoricalCandle],
        five_min: &[HistoricalCandle],
        fifteen_min: &[HistoricalCandle],
    ) {
        let mut five_cursor = 0;
        let mut fifteen_cursor = 0;

        for row in one_min {
            let mut closed = ClosedCandles {
                one_min: Some(row.to_candle(Interval::OneMinute)),
                ..Default::default()
            };

            if let Some(next) = five_min.get(five_cursor) {
                if next.end == row.end {
                    closed.five_min = Some(next.to_candle(Interval::FiveMinutes));
                    five_cursor += 1;
                }
            }
            if let Some(next) = fifteen_min.get(fifteen_cursor) {
                if next.end == row.end {
                    closed.fifteen_min = Some(next.to_candle(Interval::FifteenMinutes));
                    fifteen_cursor += 1;
                }
            }

            self.process_closed_candles(&closed);
        }
    }
}
