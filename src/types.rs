/// Core type definitions shared across the engine
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier uniquely naming a tradable contract.
pub type InstrumentKey = String;

/// Option type (Call or Put)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionType {
    CE,
    PE,
}

impl OptionType {
    pub fn as_str(&self) -> &str {
        match self {
            OptionType::CE => "CE",
            OptionType::PE => "PE",
        }
    }

    /// The opposite leg's filter-direction sign: +1 for CE, -1 for PE.
    pub fn sign(&self) -> f64 {
        match self {
            OptionType::CE => 1.0,
            OptionType::PE => -1.0,
        }
    }
}

/// Which kind of contract an `Instrument` represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Segment {
    Index,
    Option,
}

/// Contract metadata, sourced from the periodically-refreshed instrument master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub key: InstrumentKey,
    pub symbol: String,
    pub segment: Segment,
    pub option_type: Option<OptionType>,
    pub strike: Option<f64>,
    pub expiry: Option<NaiveDate>,
    pub lot_size: Option<i32>,
    pub tick_size: f64,
    pub exchange_segment: String,
}

impl Instrument {
    /// `round(spot / strikeStep) * strikeStep`
    pub fn atm_strike(spot: f64, strike_step: f64) -> f64 {
        (spot / strike_step).round() * strike_step
    }
}

/// A single market-data update for one instrument.
#[derive(Debug, Clone)]
pub struct Tick {
    pub instrument: InstrumentKey,
    pub ts: i64,
    pub ltp: f64,
    pub ltq: Option<i64>,
    pub oi: Option<i64>,
    pub volume: Option<i64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
}

/// A fixed-interval OHLCV bucket. `complete` distinguishes the live
/// incomplete candle from a finalised, never-again-mutated one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub complete: bool,
}

/// Per-contract state tracked for every option under active subscription.
#[derive(Debug, Clone)]
pub struct OptionContractState {
    pub instrument_key: InstrumentKey,
    pub strike: f64,
    pub option_type: OptionType,
    pub expiry: NaiveDate,
    pub last_price: f64,
    pub oi: i64,
    pub last_update: DateTime<Utc>,
}

/// A single leg's Black-Scholes outputs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Leg {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
    pub iv: f64,
    pub price: f64,
    pub quality_score: f64,
}

impl Leg {
    pub fn undefined() -> Self {
        Leg {
            delta: f64::NAN,
            gamma: f64::NAN,
            theta: f64::NAN,
            vega: f64::NAN,
            rho: f64::NAN,
            iv: f64::NAN,
            price: f64::NAN,
            quality_score: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GreeksSnapshot {
    pub atm_strike: f64,
    pub expiry: NaiveDate,
    pub ce: Leg,
    pub pe: Leg,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PcrSentiment {
    ExtremeBearish,
    Bearish,
    Bullish,
    ExtremeBullish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PcrTrend {
    Rising,
    Falling,
    Flat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcrState {
    pub total_ce_oi: i64,
    pub total_pe_oi: i64,
    pub pcr: Option<f64>,
    pub sentiment: PcrSentiment,
    pub trend: PcrTrend,
    pub sample_count: u64,
    pub last_update: DateTime<Utc>,
}

/// Named filter outcomes, per design note §9: a record, not a map, so a
/// missing filter is a compile error rather than a runtime surprise.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FilterResults {
    pub supertrend: bool,
    pub ema: bool,
    pub rsi: bool,
    pub volatility: bool,
    pub entry_confirmation: bool,
    pub greeks: bool,
    pub pcr: bool,
    pub volume: bool,
}

impl FilterResults {
    pub const TOTAL: usize = 8;

    pub fn passed_count(&self) -> usize {
        [
            self.supertrend,
            self.ema,
            self.rsi,
            self.volatility,
            self.entry_confirmation,
            self.greeks,
            self.pcr,
            self.volume,
        ]
        .iter()
        .filter(|p| **p)
        .count()
    }

    pub fn all_pass(&self) -> bool {
        self.passed_count() == Self::TOTAL
    }

    pub fn confidence(&self) -> f64 {
        100.0 * self.passed_count() as f64 / Self::TOTAL as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterName {
    Supertrend,
    Ema,
    Rsi,
    Volatility,
    EntryConfirmation,
    Greeks,
    Pcr,
    Volume,
}

impl FilterName {
    pub fn as_str(&self) -> &str {
        match self {
            FilterName::Supertrend => "SUPERTREND",
            FilterName::Ema => "EMA",
            FilterName::Rsi => "RSI",
            FilterName::Volatility => "VOLATILITY",
            FilterName::EntryConfirmation => "ENTRY_CONFIRMATION",
            FilterName::Greeks => "GREEKS",
            FilterName::Pcr => "PCR",
            FilterName::Volume => "VOLUME",
        }
    }
}

/// One entry of the deterministic reasoning trail (spec §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterOutcome {
    pub name: FilterName,
    pub passed: bool,
    pub observed: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    BuyCe,
    BuyPe,
    Hold,
}

impl SignalKind {
    pub fn as_str(&self) -> &str {
        match self {
            SignalKind::BuyCe => "BUY_CE",
            SignalKind::BuyPe => "BUY_PE",
            SignalKind::Hold => "HOLD",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub reason: String,
    pub filters: FilterResults,
    pub reasoning: Vec<FilterOutcome>,
    pub confidence: f64,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    Stop,
    Target,
    Trail,
    EodSquareOff,
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &str {
        match self {
            ExitReason::Stop => "STOP",
            ExitReason::Target => "TARGET",
            ExitReason::Trail => "TRAIL",
            ExitReason::EodSquareOff => "EOD_SQUARE_OFF",
            ExitReason::Manual => "MANUAL",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub option_type: OptionType,
    pub instrument_key: InstrumentKey,
    pub strike: f64,
    pub entry_ts: DateTime<Utc>,
    pub entry_price: f64,
    pub qty: i32,
    pub stop_loss: f64,
    pub target: f64,
    pub trailing_sl: Option<f64>,
    pub trailing_active: bool,
    pub status: PositionStatus,
    pub exit_reason: Option<ExitReason>,
    pub exit_price: Option<f64>,
    pub exit_ts: Option<DateTime<Utc>>,
    pub realised_pnl: Option<f64>,
    pub last_price: f64,
    pub high_since_entry: f64,
    pub low_since_entry: f64,
}

impl Position {
    pub fn unrealised_pnl(&self) -> f64 {
        (self.last_price - self.entry_price) * self.qty as f64
    }

    pub fn unrealised_pnl_pct(&self) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        (self.last_price - self.entry_price) / self.entry_price * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Filled,
    Rejected,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub instrument_key: InstrumentKey,
    pub side: Side,
    pub kind: OrderKind,
    pub qty: i32,
    pub limit_price: Option<f64>,
    pub idempotency_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub order_id: String,
    pub fill_price: f64,
    pub fill_ts: DateTime<Utc>,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub position_id: String,
    pub instrument_key: InstrumentKey,
    pub option_type: OptionType,
    pub strike: f64,
    pub qty: i32,
    pub entry_ts: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_ts: DateTime<Utc>,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    pub realised_pnl: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub initial_capital: f64,
    pub current_balance: f64,
    pub daily_pnl: f64,
    pub daily_loss_limit: f64,
    pub max_concurrent_positions: usize,
    pub risk_per_trade_pct: f64,
    pub trading_allowed: bool,
    pub session_start: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Paper,
    Live,
}

/// Snapshot of the full system state, assembled at a bounded cadence for
/// downstream consumers (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub ts: DateTime<Utc>,
    pub spot: f64,
    pub positions: Vec<Position>,
    pub signal: Signal,
    pub indicators: IndicatorsSnapshot,
    pub pcr: PcrSnapshot,
    pub greeks: Option<GreeksSnapshot>,
    pub risk: RiskSnapshot,
    pub auth: AuthState,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IndicatorsSnapshot {
    pub rsi: f64,
    pub ema5: f64,
    pub ema20: f64,
    pub atr_pct: f64,
    pub vwap: f64,
    pub supertrend_bullish: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PcrSnapshot {
    pub value: Option<f64>,
    pub sentiment: PcrSentiment,
    pub trend: PcrTrend,
    pub ce_oi: i64,
    pub pe_oi: i64,
    pub samples: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub daily_pnl: f64,
    pub loss_limit: f64,
    pub trading_allowed: bool,
    pub open_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthState {
    pub authenticated: bool,
    pub token_remaining_seconds: Option<i64>,
    pub error_message: Option<String>,
}

/// Operator command interface (spec §6).
#[derive(Debug, Clone)]
pub enum OperatorCommand {
    Start,
    Stop,
    ClosePosition { id: String, exit_price: f64 },
    SetMode(Mode),
    AddFunds(f64),
    GetStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandError {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atm_strike_rounds_to_nearest_step() {
        assert_eq!(Instrument::atm_strike(22137.0, 50.0), 22150.0);
        assert_eq!(Instrument::atm_strike(22124.0, 50.0), 22100.0);
    }

    #[test]
    fn filter_results_confidence() {
        let mut f = FilterResults::default();
        f.supertrend = true;
        f.ema = true;
        f.rsi = true;
        f.volatility = true;
        f.entry_confirmation = true;
        f.greeks = true;
        f.pcr = true;
        assert_eq!(f.passed_count(), 7);
        assert_eq!(f.confidence(), 87.5);
        assert!(!f.all_pass());
    }

    #[test]
    fn position_unrealised_pnl() {
        let pos = Position {
            id: "p1".into(),
            option_type: OptionType::CE,
            instrument_key: "NIFTY_CE_22150".into(),
            strike: 22150.0,
            entry_ts: Utc::now(),
            entry_price: 100.0,
            qty: 50,
            stop_loss: 70.0,
            target: 160.0,
            trailing_sl: None,
            trailing_active: false,
            status: PositionStatus::Open,
            exit_reason: None,
            exit_price: None,
            exit_ts: None,
            realised_pnl: None,
            last_price: 120.0,
            high_since_entry: 120.0,
            low_since_entry: 100.0,
        };
        assert_eq!(pos.unrealised_pnl(), 1000.0);
        assert_eq!(pos.unrealised_pnl_pct(), 20.0);
    }
}
