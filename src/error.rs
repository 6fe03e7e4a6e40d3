/// Centralized error types for the trading engine
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TradingError {
    // Authentication Errors
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Token expired: {0}")]
    TokenExpired(String),

    // Network Errors
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Feed connection failed: {0}")]
    FeedConnectionFailed(String),

    #[error("Feed disconnected: {0}")]
    FeedDisconnected(String),

    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    // Feed / Decode Errors
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Unknown feed message kind: {0}")]
    UnknownFeedMessage(String),

    // Data Errors
    #[error("Data gap detected: {0}")]
    DataGap(String),

    #[error("Invalid candle data: {0}")]
    InvalidCandleData(String),

    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Contradictory open interest: {0}")]
    ContradictoryOi(String),

    #[error("Deserialization failed: {0}")]
    DeserializationError(#[from] serde_json::Error),

    // Numeric Errors
    #[error("Implied volatility did not converge: {0}")]
    IvNonConvergence(String),

    #[error("NaN indicator input: {0}")]
    NanIndicatorInput(String),

    // Order Errors
    #[error("Order placement failed: {0}")]
    OrderPlacementFailed(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Order status unknown after timeout: {0}")]
    OrderUnknown(String),

    // Position Errors
    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Position limit exceeded: {0}")]
    PositionLimitExceeded(String),

    #[error("Position already exists: {0}")]
    DuplicatePosition(String),

    // Risk Errors
    #[error("Daily loss limit breached: {0}")]
    DailyLossLimit(String),

    #[error("Risk check failed: {0}")]
    RiskCheckFailed(String),

    #[error("Risk exceeded for candidate: {0}")]
    RiskExceeded(String),

    #[error("Computed size too small: {0}")]
    SizeTooSmall(String),

    // Signal / Strategy Errors
    #[error("Invalid signal engine state: {0}")]
    InvalidSignalState(String),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    // File I/O Errors
    #[error("File I/O error: {0}")]
    FileError(#[from] std::io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    // Market Session Errors
    #[error("Market closed: {0}")]
    MarketClosed(String),

    #[error("Outside trading window: {0}")]
    OutOfWindow(String),

    #[error("Non-trading day: {0}")]
    NonTradingDay(String),

    // Broker Errors
    #[error("Broker API error: {code} - {message}")]
    BrokerApiError { code: String, message: String },

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Instrument not found: {0}")]
    InstrumentNotFound(String),

    // System Errors
    #[error("System shutdown: {0}")]
    SystemShutdown(String),

    #[error("Fatal error: {0}")]
    FatalError(String),

    // Idempotency Errors
    #[error("Duplicate event detected: {0}")]
    DuplicateEvent(String),

    // Generic Errors
    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TradingError>;

impl TradingError {
    /// Check if error is recoverable (log and continue)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TradingError::NetworkTimeout(_)
                | TradingError::FeedDisconnected(_)
                | TradingError::DataGap(_)
                | TradingError::MalformedFrame(_)
                | TradingError::OrderPlacementFailed(_)
                | TradingError::RateLimitExceeded(_)
        )
    }

    /// Check if error requires immediate system shutdown
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TradingError::FatalError(_) | TradingError::SystemShutdown(_)
        )
    }

    /// Check if error requires exiting open positions (not halting the process)
    pub fn requires_exit(&self) -> bool {
        matches!(
            self,
            TradingError::DailyLossLimit(_)
                | TradingError::TokenExpired(_)
                | TradingError::MarketClosed(_)
        )
    }

    /// Stable reason code surfaced on the orchestrator snapshot
    pub fn error_code(&self) -> &str {
        match self {
            TradingError::AuthenticationFailed(_) => "AUTH_001",
            TradingError::TokenExpired(_) => "AUTH_002",
            TradingError::HttpError(_) => "NET_001",
            TradingError::FeedConnectionFailed(_) => "NET_002",
            TradingError::FeedDisconnected(_) => "NET_003",
            TradingError::NetworkTimeout(_) => "NET_004",
            TradingError::MalformedFrame(_) => "FEED_001",
            TradingError::UnknownFeedMessage(_) => "FEED_002",
            TradingError::DataGap(_) => "DATA_001",
            TradingError::InvalidCandleData(_) => "DATA_002",
            TradingError::MissingData(_) => "DATA_003",
            TradingError::ContradictoryOi(_) => "DATA_004",
            TradingError::DeserializationError(_) => "DATA_005",
            TradingError::IvNonConvergence(_) => "NUM_001",
            TradingError::NanIndicatorInput(_) => "NUM_002",
            TradingError::OrderPlacementFailed(_) => "ORDER_001",
            TradingError::OrderNotFound(_) => "ORDER_002",
            TradingError::OrderRejected(_) => "ORDER_003",
            TradingError::OrderUnknown(_) => "ORDER_004",
            TradingError::PositionNotFound(_) => "POS_001",
            TradingError::PositionLimitExceeded(_) => "POS_002",
            TradingError::DuplicatePosition(_) => "POS_003",
            TradingError::DailyLossLimit(_) => "RISK_001",
            TradingError::RiskCheckFailed(_) => "RISK_002",
            TradingError::RiskExceeded(_) => "RISK_003",
            TradingError::SizeTooSmall(_) => "RISK_004",
            TradingError::InvalidSignalState(_) => "SIG_001",
            TradingError::ConfigError(_) => "CFG_001",
            TradingError::InvalidParameter(_) => "CFG_002",
            TradingError::FileError(_) => "FILE_001",
            TradingError::FileNotFound(_) => "FILE_002",
            TradingError::MarketClosed(_) => "MKT_001",
            TradingError::OutOfWindow(_) => "MKT_002",
            TradingError::NonTradingDay(_) => "MKT_003",
            TradingError::BrokerApiError { .. } => "BROKER_001",
            TradingError::RateLimitExceeded(_) => "BROKER_002",
            TradingError::InstrumentNotFound(_) => "BROKER_003",
            TradingError::SystemShutdown(_) => "SYS_001",
            TradingError::FatalError(_) => "SYS_002",
            TradingError::DuplicateEvent(_) => "IDEM_001",
            TradingError::InternalError(_) => "INT_001",
            TradingError::Other(_) => "GEN_001",
        }
    }
}
