pub mod manager;

pub use manager::{RiskDecision, RiskGate};
