//! Live websocket session against the match feed.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use goose_exchange::{coinbase, FeedMessage, MatchFeed};

use crate::{MonitorError, MonitorInner, MonitorState};

/// Run the live session until killed. A fatal error during streaming (a
/// source-ordering violation, a malformed price, a dropped transport) logs
/// and exits the process non-zero; trading blind is worse than dying.
pub(crate) async fn run(
    inner: Arc<MonitorInner>,
    kill_rx: mpsc::Receiver<bool>,
    stopped_tx: oneshot::Sender<bool>,
) {
    if let Err(err) = stream_matches(&inner, kill_rx).await {
        error!(error = %err, "live monitoring failed");
        std::process::exit(1);
    }

    let _ = stopped_tx.send(true);
}

async fn stream_matches(
    inner: &MonitorInner,
    mut kill_rx: mpsc::Receiver<bool>,
) -> Result<(), MonitorError> {
    inner.set_state(MonitorState::Connecting);

    let market = coinbase::product_id(&inner.config.asset, "USD");
    let mut feed = MatchFeed::connect(&inner.config.feed_url, market).await?;
    inner.set_state(MonitorState::Connected);

    feed.subscribe().await?;

    loop {
        tokio::select! {
            _ = kill_rx.recv() => {
                debug!("kill signal received; leaving the read loop");
                break;
            }
            message = feed.next_message() => {
                handle_feed_message(inner, message?)?;
            }
        }
    }

    feed.close().await;
    inner.set_state(MonitorState::Disconnected);

    Ok(())
}

/// Advance the session state machine with one feed message.
///
/// Trade messages are only consumed once the stores are primed; anything
/// arriving earlier is dropped so the candle series never starts from a
/// partial window.
fn handle_feed_message(inner: &MonitorInner, message: FeedMessage) -> Result<(), MonitorError> {
    match (message, inner.state()) {
        (FeedMessage::Subscriptions {}, _) => {
            inner.set_state(MonitorState::Subscribed);
            info!("subscribed to the match feed channels");
        }
        (FeedMessage::LastMatch(event), MonitorState::Subscribed) => {
            inner.prime(event.trade()?)?;
            inner.set_state(MonitorState::Ready);
        }
        (FeedMessage::Match(event), MonitorState::Ready) => {
            inner.ingest(event.trade()?)?;
        }
        (FeedMessage::Heartbeat { product_id }, _) => {
            debug!(?product_id, "heartbeat");
        }
        (message, state) => {
            debug!(?message, ?state, "ignoring feed message in current state");
        }
    }

    Ok(())
}
