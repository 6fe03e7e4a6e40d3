/// Internal pub/sub event bus: every component publishes state-transition
/// events here for logging, journaling and (eventually) dashboard replay.
pub mod event_bus;
pub mod types;

pub use event_bus::EventBus;
pub use types::{Event, EventPayload, EventType};
