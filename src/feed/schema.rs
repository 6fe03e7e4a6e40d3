/// Wire types for the market-data feed: outbound control messages and the
/// inbound server frame shapes the decoder understands.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Tick;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedMode {
    Ltpc,
    Full,
    OptionGreeks,
    FullD30,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlMethod {
    Sub,
    Unsub,
    ChangeMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlData {
    #[serde(rename = "instrumentKeys")]
    pub instrument_keys: Vec<String>,
    pub mode: FeedMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMessage {
    pub guid: String,
    pub method: ControlMethod,
    pub data: ControlData,
}

impl ControlMessage {
    pub fn subscribe(guid: String, instrument_keys: Vec<String>, mode: FeedMode) -> Self {
        ControlMessage {
            guid,
            method: ControlMethod::Sub,
            data: ControlData {
                instrument_keys,
                mode,
            },
        }
    }

    pub fn unsubscribe(guid: String, instrument_keys: Vec<String>, mode: FeedMode) -> Self {
        ControlMessage {
            guid,
            method: ControlMethod::Unsub,
            data: ControlData {
                instrument_keys,
                mode,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServerFrameKind {
    InitialFeed,
    LiveFeed,
    MarketInfo,
}

/// Raw shape of a server frame: a kind tag, a per-instrument feed map for
/// tick-bearing frames, and an optional top-level status for market-info
/// frames. Individual feed entries are kept as `Value` because the three
/// feed unions (`ltpc` / `fullFeed` / `firstLevelWithGreeks`) share most
/// fields and differ only in which optional ones are present.
#[derive(Debug, Deserialize)]
pub struct RawServerFrame {
    #[serde(rename = "type")]
    pub kind: ServerFrameKind,
    #[serde(default)]
    pub feeds: HashMap<String, Value>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub ts: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct MarketStatusEvent {
    pub status: String,
    pub ts: i64,
}

#[derive(Debug, Clone)]
pub enum FeedMessage {
    Ticks(Vec<Tick>),
    MarketStatus(MarketStatusEvent),
}

/// Open interest is carried as `oi`, `open_interest`, or nested under
/// `ohlc.oi` depending on feed mode; all three are equivalent sources.
pub fn extract_oi(value: &Value) -> Option<i64> {
    value
        .get("oi")
        .and_then(Value::as_i64)
        .or_else(|| value.get("open_interest").and_then(Value::as_i64))
        .or_else(|| value.pointer("/ohlc/oi").and_then(Value::as_i64))
}

pub fn parse_tick(instrument_key: &str, value: &Value) -> Option<Tick> {
    let ltp = value.get("ltp").and_then(Value::as_f64)?;
    let ts = value
        .get("ltt")
        .and_then(Value::as_i64)
        .or_else(|| value.get("ts").and_then(Value::as_i64))?;
    let ltq = value
        .get("ltq")
        .and_then(Value::as_i64)
        .or_else(|| value.get("last_traded_quantity").and_then(Value::as_i64));
    let volume = value
        .get("vtt")
        .and_then(Value::as_i64)
        .or_else(|| value.get("volume").and_then(Value::as_i64));
    let oi = extract_oi(value);
    let bid = value
        .get("bidP")
        .and_then(Value::as_f64)
        .or_else(|| value.get("bid").and_then(Value::as_f64));
    let ask = value
        .get("askP")
        .and_then(Value::as_f64)
        .or_else(|| value.get("ask").and_then(Value::as_f64));

    Some(Tick {
        instrument: instrument_key.to_string(),
        ts,
        ltp,
        ltq,
        oi,
        volume,
        bid,
        ask,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oi_equivalence_across_shapes() {
        let direct = serde_json::json!({ "oi": 1200 });
        let named = serde_json::json!({ "open_interest": 1200 });
        let nested = serde_json::json!({ "ohlc": { "oi": 1200 } });
        assert_eq!(extract_oi(&direct), Some(1200));
        assert_eq!(extract_oi(&named), Some(1200));
        assert_eq!(extract_oi(&nested), Some(1200));
    }

    #[test]
    fn parse_tick_requires_ltp_and_ts() {
        let missing_ts = serde_json::json!({ "ltp": 125.4 });
        assert!(parse_tick("NSE_INDEX|Nifty 50", &missing_ts).is_none());

        let full = serde_json::json!({ "ltp": 125.4, "ltt": 1_700_000_000_000i64, "oi": 500 });
        let tick = parse_tick("NSE_INDEX|Nifty 50", &full).unwrap();
        assert_eq!(tick.ltp, 125.4);
        assert_eq!(tick.oi, Some(500));
    }
}
