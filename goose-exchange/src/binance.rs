//! Binance-style REST candle source.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use goose_core::{Interval, Symbol};

use crate::{CandleSource, ExchangeError, ExchangeResult, HistoricalCandle};

const BASE_URL: &str = "https://api.binance.us";
const CANDLES_PATH: &str = "/api/v3/klines";
const API_KEY_HEADER: &str = "X-MBX-APIKEY";

// Kline rows are positional 12-field JSON arrays: timestamps in ms since the
// epoch as numbers, prices and volumes as quoted strings, counts as numbers.
const START_TIME_INDEX: usize = 0;
const OPEN_INDEX: usize = 1;
const HIGH_INDEX: usize = 2;
const LOW_INDEX: usize = 3;
const CLOSE_INDEX: usize = 4;
const VOLUME_INDEX: usize = 5;
const END_TIME_INDEX: usize = 6;
const COUNT_INDEX: usize = 8;

/// REST client for a Binance-style candle endpoint.
pub struct BinanceClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
}

impl Default for BinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BinanceClient {
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    /// Point the client at a different host. Used by tests and regional
    /// deployments.
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: None,
            api_secret: None,
        }
    }

    /// Store API credentials for use in request headers. The endpoint used
    /// here only requires the key header; the secret is held for future
    /// signed endpoints.
    pub fn auth(&mut self, key: impl Into<String>, secret: impl Into<String>) {
        self.api_key = Some(key.into());
        self.api_secret = Some(secret.into());
    }

    /// Whether credentials have been provided.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() && self.api_secret.is_some()
    }
}

#[async_trait]
impl CandleSource for BinanceClient {
    fn market_symbol(&self, asset: &str, quote: &str) -> Symbol {
        format!("{}{}", asset.to_uppercase(), quote.to_uppercase())
    }

    async fn retrieve_candles(
        &self,
        market: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> ExchangeResult<Vec<HistoricalCandle>> {
        let url = format!("{}{}", self.base_url, CANDLES_PATH);
        let mut request = self.http.get(&url).query(&[
            ("symbol", market.to_string()),
            ("interval", interval.rest_label().to_string()),
            ("startTime", start.timestamp_millis().to_string()),
            ("endTime", end.timestamp_millis().to_string()),
            ("limit", limit.to_string()),
        ]);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        debug!(%market, interval = interval.rest_label(), %start, %end, limit, "retrieving candles");

        let response = request
            .send()
            .await
            .map_err(|err| ExchangeError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExchangeError::Http {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| ExchangeError::Transport(err.to_string()))?;

        parse_kline_page(&body)
    }
}

/// Error payload some venues return with a 2xx status.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorPayload {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

impl ApiErrorPayload {
    /// Whether the decoded structure actually holds an error, as opposed to
    /// an unrelated payload that happened to fit the model.
    fn populated(&self) -> bool {
        self.code != 0 && !self.msg.is_empty()
    }
}

/// Decode a kline page body into candle rows, surfacing venue-reported API
/// errors that arrived with a 2xx status.
fn parse_kline_page(body: &[u8]) -> ExchangeResult<Vec<HistoricalCandle>> {
    if let Ok(api_error) = serde_json::from_slice::<ApiErrorPayload>(body) {
        if api_error.populated() {
            return Err(ExchangeError::Api {
                code: api_error.code,
                message: api_error.msg,
            });
        }
    }

    let rows: Vec<Value> = serde_json::from_slice(body)
        .map_err(|err| ExchangeError::Protocol(format!("malformed kline page: {err}")))?;

    rows.iter().map(parse_kline_row).collect()
}

fn parse_kline_row(row: &Value) -> ExchangeResult<HistoricalCandle> {
    let fields = row
        .as_array()
        .ok_or_else(|| ExchangeError::Protocol("kline row is not an array".into()))?;

    Ok(HistoricalCandle {
        start: millis_field(fields, START_TIME_INDEX, "start time")?,
        end: millis_field(fields, END_TIME_INDEX, "end time")?,
        open: decimal_field(fields, OPEN_INDEX, "open")?,
        high: decimal_field(fields, HIGH_INDEX, "high")?,
        low: decimal_field(fields, LOW_INDEX, "low")?,
        close: decimal_field(fields, CLOSE_INDEX, "close")?,
        volume: decimal_field(fields, VOLUME_INDEX, "volume")?,
        count: count_field(fields, COUNT_INDEX)?,
    })
}

fn millis_field(fields: &[Value], index: usize, name: &str) -> ExchangeResult<DateTime<Utc>> {
    let millis = fields
        .get(index)
        .and_then(Value::as_i64)
        .ok_or_else(|| ExchangeError::Protocol(format!("kline {name} is not a timestamp")))?;
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| ExchangeError::Protocol(format!("kline {name} {millis} is out of range")))
}

fn decimal_field(fields: &[Value], index: usize, name: &str) -> ExchangeResult<Decimal> {
    let raw = fields
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| ExchangeError::Protocol(format!("kline {name} is not a quoted number")))?;
    raw.parse()
        .map_err(|err| ExchangeError::Protocol(format!("kline {name} '{raw}': {err}")))
}

fn count_field(fields: &[Value], index: usize) -> ExchangeResult<u32> {
    fields
        .get(index)
        .and_then(Value::as_u64)
        .and_then(|count| u32::try_from(count).ok())
        .ok_or_else(|| ExchangeError::Protocol("kline count is not a number".into()))
}
