/// Feed transport: connects to the broker's tick websocket, decodes frames,
/// and forwards `FeedMessage`s to the orchestrator's router. Reconnects with
/// exponential backoff on socket failure or after three consecutive
/// malformed frames.
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::decoder::FrameDecoder;
use super::schema::{ControlMessage, FeedMessage, FeedMode};
use crate::error::{Result, TradingError};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct FeedClient {
    url: String,
    bearer_token: String,
}

impl FeedClient {
    pub fn new(url: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        FeedClient {
            url: url.into(),
            bearer_token: bearer_token.into(),
        }
    }

    /// Run the feed forever, restarting the connection with exponential
    /// backoff whenever it drops or its decode stream escalates. Decoded
    /// messages are pushed onto `tx`; the subscribe list is re-sent after
    /// every reconnect.
    pub async fn run(
        &self,
        subscribe_keys: Vec<String>,
        mode: FeedMode,
        tx: mpsc::Sender<FeedMessage>,
    ) -> Result<()> {
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.connect_and_stream(&subscribe_keys, mode, &tx).await {
                Ok(()) => {
                    info!("feed session ended cleanly, reconnecting");
                    backoff = INITIAL_BACKOFF;
                    attempt = 0;
                }
                Err(e) => {
                    warn!("feed session failed (attempt {attempt}): {e}");
                }
            }

            let sleep_for = jittered(backoff);
            debug!("reconnecting in {:?}", sleep_for);
            tokio::time::sleep(sleep_for).await;
            backoff = std::cmp::min(backoff.saturating_mul(2), MAX_BACKOFF);
        }
    }

    async fn connect_and_stream(
        &self,
        subscribe_keys: &[String],
        mode: FeedMode,
        tx: &mpsc::Sender<FeedMessage>,
    ) -> Result<()> {
        let url = format!("{}?token={}", self.url, self.bearer_token);
        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| TradingError::FeedConnectionFailed(e.to_string()))?;

        info!("feed connected");
        let (mut write, mut read) = ws_stream.split();

        if !subscribe_keys.is_empty() {
            let sub = ControlMessage::subscribe(Uuid::new_v4().to_string(), subscribe_keys.to_vec(), mode);
            let payload = serde_json::to_vec(&sub)?;
            write
                .send(Message::Binary(payload))
                .await
                .map_err(|e| TradingError::FeedConnectionFailed(format!("subscribe failed: {e}")))?;
        }

        let mut decoder = FrameDecoder::new();

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| TradingError::FeedDisconnected(e.to_string()))?;
            let frame = match msg {
                Message::Binary(data) => data,
                Message::Text(text) => text.into_bytes(),
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => {
                    return Err(TradingError::FeedDisconnected("server closed connection".to_string()))
                }
                Message::Frame(_) => continue,
            };

            match decoder.decode_frame(&frame) {
                Ok(message) => {
                    if tx.send(message).await.is_err() {
                        warn!("feed consumer dropped, ending session");
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!("dropped malformed frame ({}/3): {e}", decoder.consecutive_malformed());
                    if decoder.should_reconnect() {
                        return Err(TradingError::FeedDisconnected(
                            "3 consecutive malformed frames".to_string(),
                        ));
                    }
                }
            }
        }

        Err(TradingError::FeedDisconnected("read stream ended".to_string()))
    }
}

/// Apply ±20% jitter to a backoff duration using sub-second clock bits as
/// the jitter source, avoiding a dependency on a random-number crate for a
/// single cosmetic spread.
fn jittered(base: Duration) -> Duration {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let spread = ((nanos % 1000) as f64 / 1000.0) * 0.4 - 0.2; // in [-0.2, 0.2]
    base.mul_f64((1.0 + spread).max(0.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_twenty_percent() {
        for _ in 0..50 {
            let j = jittered(Duration::from_secs(10));
            assert!(j.as_secs_f64() >= 7.9 && j.as_secs_f64() <= 12.1);
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = INITIAL_BACKOFF;
        for _ in 0..10 {
            backoff = std::cmp::min(backoff.saturating_mul(2), MAX_BACKOFF);
        }
        assert_eq!(backoff, MAX_BACKOFF);
    }
}
