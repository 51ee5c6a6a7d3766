//! Coinbase-Pro-style websocket match feed.

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};

use goose_core::{Symbol, Trade};

use crate::{ExchangeError, ExchangeResult};

/// Default public feed endpoint.
pub const FEED_URL: &str = "wss://ws-feed.pro.coinbase.com";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The stream venue's spelling of a market symbol (e.g. `BTC-USD`).
#[must_use]
pub fn product_id(asset: &str, quote: &str) -> Symbol {
    format!("{}-{}", asset.to_uppercase(), quote.to_uppercase())
}

/// Messages the monitor consumes from the feed.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    /// Acknowledgement that the requested channel subscriptions are active.
    Subscriptions {},
    /// Periodic liveness signal for a subscribed product.
    Heartbeat {
        #[serde(default)]
        product_id: Option<String>,
    },
    /// The most recent trade known at subscription time.
    LastMatch(MatchEvent),
    /// A newly executed trade.
    Match(MatchEvent),
    /// Anything this engine does not consume.
    #[serde(other)]
    Unknown,
}

/// A single executed trade as reported on the `matches` channel.
#[derive(Debug, Deserialize)]
pub struct MatchEvent {
    pub product_id: String,
    pub price: String,
    pub time: DateTime<Utc>,
}

impl MatchEvent {
    /// Parse the venue's quoted price into an engine trade. A price that
    /// fails to parse as a decimal is a protocol fault.
    pub fn trade(&self) -> ExchangeResult<Trade> {
        let price = self.price.parse().map_err(|err| {
            ExchangeError::Protocol(format!("match price '{}': {err}", self.price))
        })?;
        Ok(Trade::new(self.time, price))
    }
}

/// A live connection to the match feed for one market.
pub struct MatchFeed {
    socket: WsStream,
    market: Symbol,
}

impl MatchFeed {
    /// Dial the feed endpoint.
    pub async fn connect(url: &str, market: Symbol) -> ExchangeResult<Self> {
        let (socket, _) = connect_async(url)
            .await
            .map_err(|err| ExchangeError::Transport(err.to_string()))?;

        debug!(%url, %market, "match feed connected");

        Ok(Self { socket, market })
    }

    /// Request the `heartbeat` and `matches` channels for this market.
    pub async fn subscribe(&mut self) -> ExchangeResult<()> {
        let payload = json!({
            "type": "subscribe",
            "channels": [
                { "name": "heartbeat", "product_ids": [&self.market] },
                { "name": "matches", "product_ids": [&self.market] },
            ],
        });

        self.socket
            .send(Message::Text(payload.to_string()))
            .await
            .map_err(|err| ExchangeError::Transport(err.to_string()))
    }

    /// Await the next consumable feed message, answering pings along the
    /// way. Stream termination is a transport error: the feed is expected to
    /// outlive the session.
    pub async fn next_message(&mut self) -> ExchangeResult<FeedMessage> {
        loop {
            let frame = self
                .socket
                .next()
                .await
                .ok_or_else(|| ExchangeError::Transport("match feed stream ended".into()))?
                .map_err(|err| ExchangeError::Transport(err.to_string()))?;

            match frame {
                Message::Text(text) => return parse_feed_message(&text),
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => return parse_feed_message(&text),
                    Err(_) => {
                        warn!("received non UTF-8 binary payload from the match feed");
                    }
                },
                Message::Ping(payload) => {
                    self.socket
                        .send(Message::Pong(payload))
                        .await
                        .map_err(|err| ExchangeError::Transport(err.to_string()))?;
                }
                Message::Pong(_) | Message::Frame(_) => {}
                Message::Close(frame) => {
                    return Err(ExchangeError::Transport(format!(
                        "match feed closed: {frame:?}"
                    )));
                }
            }
        }
    }

    /// Close the connection. Errors are ignored: the session is over either
    /// way.
    pub async fn close(&mut self) {
        let _ = self.socket.send(Message::Close(None)).await;
        let _ = self.socket.close(None).await;
    }

    #[must_use]
    pub fn market(&self) -> &str {
        &self.market
    }
}

fn parse_feed_message(text: &str) -> ExchangeResult<FeedMessage> {
    serde_json::from_str(text)
        .map_err(|err| ExchangeError::Protocol(format!("malformed feed message: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn product_ids_join_base_and_quote_with_a_dash() {
        assert_eq!(product_id("BTC", "USD"), "BTC-USD");
        assert_eq!(product_id("eth", "usd"), "ETH-USD");
    }

    #[test]
    fn match_messages_decode_and_parse_into_trades() {
        let text = r#"{
            "type": "match",
            "trade_id": 123456,
            "maker_order_id": "ac928c66-ca53-498f-9c13-a110027a60e8",
            "taker_order_id": "132fb6ae-456b-4654-b4e0-d681ac05cea1",
            "side": "sell",
            "size": "0.103",
            "price": "9312.75",
            "product_id": "BTC-USD",
            "sequence": 50,
            "time": "2020-01-01T00:00:30.123456Z"
        }"#;

        let FeedMessage::Match(event) = parse_feed_message(text).unwrap() else {
            panic!("expected a match message");
        };
        assert_eq!(event.product_id, "BTC-USD");

        let trade = event.trade().unwrap();
        assert_eq!(trade.price, dec!(9312.75));
        assert_eq!(
            trade.time,
            "2020-01-01T00:00:30.123456Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn last_match_and_heartbeat_messages_decode() {
        let last_match = r#"{
            "type": "last_match",
            "price": "9311.00",
            "product_id": "BTC-USD",
            "time": "2020-01-01T00:00:00Z"
        }"#;
        assert!(matches!(
            parse_feed_message(last_match).unwrap(),
            FeedMessage::LastMatch(_)
        ));

        let heartbeat = r#"{
            "type": "heartbeat",
            "product_id": "BTC-USD",
            "sequence": 90,
            "time": "2020-01-01T00:00:01Z"
        }"#;
        assert!(matches!(
            parse_feed_message(heartbeat).unwrap(),
            FeedMessage::Heartbeat { .. }
        ));
    }

    #[test]
    fn subscription_acks_and_unknown_types_decode() {
        let ack = r#"{"type": "subscriptions", "channels": []}"#;
        assert!(matches!(
            parse_feed_message(ack).unwrap(),
            FeedMessage::Subscriptions {}
        ));

        let unknown = r#"{"type": "ticker", "price": "1.00"}"#;
        assert!(matches!(
            parse_feed_message(unknown).unwrap(),
            FeedMessage::Unknown
        ));
    }

    #[test]
    fn unparseable_prices_are_protocol_faults() {
        let text = r#"{
            "type": "match",
            "price": "not-a-price",
            "product_id": "BTC-USD",
            "time": "2020-01-01T00:00:00Z"
        }"#;

        let FeedMessage::Match(event) = parse_feed_message(text).unwrap() else {
            panic!("expected a match message");
        };
        assert!(matches!(event.trade(), Err(ExchangeError::Protocol(_))));
    }
}
