pub mod decoder;
pub mod schema;
pub mod websocket;

pub use decoder::{decode, DecodeError, FrameDecoder};
pub use schema::{ControlMessage, FeedMessage, FeedMode, MarketStatusEvent};
pub use websocket::FeedClient;
