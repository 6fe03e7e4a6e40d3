/// Orchestrator: wires every component together and drives the end-to-end
/// tick -> signal -> order -> position lifecycle (spec §5). The public
/// surface is deliberately thin; [`engine::Orchestrator`] owns the wiring.
pub mod engine;

pub use engine::Orchestrator;
