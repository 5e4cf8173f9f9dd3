//! Phase execution
//!
//! - `PhaseController`: single-flight entry point, commits session state
//! - `PhaseRunner`: candle stream -> event generator -> sink, with retry
//! - `EventGenerator`: pluggable per-phase strategy logic
//! - `EventSink`: event log and broadcaster destinations

mod controller;
mod generator;
mod runner;
mod sink;
pub mod window;

pub use controller::{PhaseController, PhaseOutcome};
pub use generator::EventGenerator;
pub use runner::{PhaseRunner, RunProgress};
pub use sink::{BroadcastSink, EventSink, LogSink};
