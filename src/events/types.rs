/// Event taxonomy for the engine's internal pub/sub bus: one entry per
/// state transition a downstream observer (logging, journal, dashboard
/// feed) might care about.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ExitReason, OptionType, SignalKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub idempotency_key: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(event_type: EventType, payload: EventPayload) -> Self {
        let timestamp = Utc::now();
        let idempotency_key = format!(
            "{:?}-{}-{}",
            event_type,
            timestamp.timestamp_nanos_opt().unwrap_or(0),
            uuid::Uuid::new_v4()
        );
        Event { event_type, timestamp, idempotency_key, payload }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    ConfigLoaded,
    RegistryRefreshed,
    FeedConnected,
    FeedDisconnected,
    FeedReconnectEscalated,
    CandleFinalised,
    SignalEvaluated,
    SignalEmitted,
    SignalCooldownSuppressed,
    RiskRejected,
    OrderSubmitted,
    OrderUnknown,
    PositionOpened,
    TrailingStopActivated,
    PositionClosed,
    DailyLossLimitBreached,
    GreeksComputed,
    PcrEmitted,
    OperatorCommandReceived,
    ShutdownInitiated,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ConfigLoaded => "CONFIG_LOADED",
            EventType::RegistryRefreshed => "REGISTRY_REFRESHED",
            EventType::FeedConnected => "FEED_CONNECTED",
            EventType::FeedDisconnected => "FEED_DISCONNECTED",
            EventType::FeedReconnectEscalated => "FEED_RECONNECT_ESCALATED",
            EventType::CandleFinalised => "CANDLE_FINALISED",
            EventType::SignalEvaluated => "SIGNAL_EVALUATED",
            EventType::SignalEmitted => "SIGNAL_EMITTED",
            EventType::SignalCooldownSuppressed => "SIGNAL_COOLDOWN_SUPPRESSED",
            EventType::RiskRejected => "RISK_REJECTED",
            EventType::OrderSubmitted => "ORDER_SUBMITTED",
            EventType::OrderUnknown => "ORDER_UNKNOWN",
            EventType::PositionOpened => "POSITION_OPENED",
            EventType::TrailingStopActivated => "TRAILING_STOP_ACTIVATED",
            EventType::PositionClosed => "POSITION_CLOSED",
            EventType::DailyLossLimitBreached => "DAILY_LOSS_LIMIT_BREACHED",
            EventType::GreeksComputed => "GREEKS_COMPUTED",
            EventType::PcrEmitted => "PCR_EMITTED",
            EventType::OperatorCommandReceived => "OPERATOR_COMMAND_RECEIVED",
            EventType::ShutdownInitiated => "SHUTDOWN_INITIATED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EventPayload {
    ConfigLoaded { data_dir: String },
    RegistryRefreshed { instrument_count: usize },
    FeedConnected,
    FeedDisconnected { reason: String },
    FeedReconnectEscalated { consecutive_failures: u32 },
    CandleFinalised { instrument_key: String, close: f64 },
    SignalEvaluated { kind: SignalKind, confidence: f64 },
    SignalEmitted { kind: SignalKind, reason: String },
    SignalCooldownSuppressed { kind: SignalKind },
    RiskRejected { reason_code: String, detail: String },
    OrderSubmitted { order_id: String, fill_price: f64 },
    OrderUnknown { order_id: String },
    PositionOpened { position_id: String, option_type: OptionType, strike: f64, qty: i32 },
    TrailingStopActivated { position_id: String, trailing_sl: f64 },
    PositionClosed { position_id: String, exit_reason: ExitReason, realised_pnl: f64 },
    DailyLossLimitBreached { daily_pnl: f64 },
    GreeksComputed { atm_strike: f64 },
    PcrEmitted { pcr: Option<f64> },
    OperatorCommandReceived { command: String },
    ShutdownInitiated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_events_get_distinct_idempotency_keys() {
        let a = Event::new(EventType::ConfigLoaded, EventPayload::ConfigLoaded { data_dir: "data".into() });
        let b = Event::new(EventType::ConfigLoaded, EventPayload::ConfigLoaded { data_dir: "data".into() });
        assert_ne!(a.idempotency_key, b.idempotency_key);
    }
}
