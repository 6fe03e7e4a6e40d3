/// Pure frame decoding: no I/O, no reconnect logic. `decode` turns one
/// websocket frame into a `FeedMessage`; `FrameDecoder` wraps it with the
/// 3-consecutive-malformed-frames escalation counter.
use thiserror::Error;

use super::schema::{parse_tick, FeedMessage, MarketStatusEvent, RawServerFrame, ServerFrameKind};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Decode one length-delimited frame payload into a `FeedMessage`.
pub fn decode(frame: &[u8]) -> Result<FeedMessage, DecodeError> {
    let text =
        std::str::from_utf8(frame).map_err(|e| DecodeError::Malformed(format!("invalid utf8: {e}")))?;

    let raw: RawServerFrame = serde_json::from_str(text)
        .map_err(|e| DecodeError::Malformed(format!("invalid frame json: {e}")))?;

    match raw.kind {
        ServerFrameKind::MarketInfo => {
            let status = raw
                .status
                .ok_or_else(|| DecodeError::Malformed("market_info frame missing status".to_string()))?;
            Ok(FeedMessage::MarketStatus(MarketStatusEvent {
                status,
                ts: raw.ts.unwrap_or_default(),
            }))
        }
        ServerFrameKind::InitialFeed | ServerFrameKind::LiveFeed => {
            if raw.feeds.is_empty() {
                return Err(DecodeError::Malformed("frame carried no feed entries".to_string()));
            }
            let mut ticks = Vec::with_capacity(raw.feeds.len());
            for (key, value) in &raw.feeds {
                // Unknown fields inside a feed entry are ignored; a feed entry
                // that lacks the mandatory ltp/ts pair is what makes the
                // whole frame malformed.
                match parse_tick(key, value) {
                    Some(tick) => ticks.push(tick),
                    None => {
                        return Err(DecodeError::Malformed(format!(
                            "feed entry for {key} missing required ltp/ts fields"
                        )))
                    }
                }
            }
            Ok(FeedMessage::Ticks(ticks))
        }
    }
}

/// Tracks consecutive decode failures so the caller can escalate to a
/// reconnect after three in a row, per the feed contract.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    consecutive_malformed: u32,
}

pub const RECONNECT_ESCALATION_THRESHOLD: u32 = 3;

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder::default()
    }

    /// Decode a frame, updating the malformed-frame streak. `Ok(None)` is
    /// never returned; a malformed frame yields `Err`, and the caller
    /// should check `should_reconnect` after handling it.
    pub fn decode_frame(&mut self, frame: &[u8]) -> Result<FeedMessage, DecodeError> {
        match decode(frame) {
            Ok(message) => {
                self.consecutive_malformed = 0;
                Ok(message)
            }
            Err(e) => {
                self.consecutive_malformed += 1;
                Err(e)
            }
        }
    }

    pub fn should_reconnect(&self) -> bool {
        self.consecutive_malformed >= RECONNECT_ESCALATION_THRESHOLD
    }

    pub fn consecutive_malformed(&self) -> u32 {
        self.consecutive_malformed
    }

    pub fn reset(&mut self) {
        self.consecutive_malformed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live_feed_frame(key: &str, ltp: f64, ts: i64) -> Vec<u8> {
        serde_json::json!({
            "type": "live_feed",
            "feeds": { key: { "ltp": ltp, "ltt": ts, "oi": 1500 } }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn decodes_live_feed_into_ticks() {
        let frame = live_feed_frame("NSE_FO|NIFTY25JUL25000CE", 120.5, 1_700_000_000_000);
        let message = decode(&frame).unwrap();
        match message {
            FeedMessage::Ticks(ticks) => {
                assert_eq!(ticks.len(), 1);
                assert_eq!(ticks[0].ltp, 120.5);
                assert_eq!(ticks[0].oi, Some(1500));
            }
            _ => panic!("expected Ticks"),
        }
    }

    #[test]
    fn decodes_market_info_into_status() {
        let frame = serde_json::json!({
            "type": "market_info",
            "status": "open",
            "ts": 1_700_000_000_000i64
        })
        .to_string()
        .into_bytes();

        match decode(&frame).unwrap() {
            FeedMessage::MarketStatus(status) => assert_eq!(status.status, "open"),
            _ => panic!("expected MarketStatus"),
        }
    }

    #[test]
    fn malformed_json_is_an_error() {
        let frame = b"not json at all".to_vec();
        assert!(decode(&frame).is_err());
    }

    #[test]
    fn three_consecutive_malformed_frames_escalate_to_reconnect() {
        let mut decoder = FrameDecoder::new();
        for _ in 0..2 {
            assert!(decoder.decode_frame(b"garbage").is_err());
            assert!(!decoder.should_reconnect());
        }
        assert!(decoder.decode_frame(b"garbage").is_err());
        assert!(decoder.should_reconnect());
    }

    #[test]
    fn a_good_frame_resets_the_malformed_streak() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.decode_frame(b"garbage").is_err());
        assert!(decoder.decode_frame(b"garbage").is_err());
        let frame = live_feed_frame("NSE_INDEX|Nifty 50", 25000.0, 1_700_000_000_000);
        assert!(decoder.decode_frame(&frame).is_ok());
        assert_eq!(decoder.consecutive_malformed(), 0);
    }
}
