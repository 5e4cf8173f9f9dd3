use anyhow::Result;

use crate::config::PhaseOptions;
use crate::state::SessionState;
use crate::types::{Candle, Event};

/// Phase-specific transform from `(state, candle)` to `(state, events)`.
///
/// Implementations are pure: everything they need lives in the state they are
/// handed, and everything they produce is in what they return. An `Err` from
/// any hook is fatal to the run and is never retried.
pub trait EventGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    fn initialize(&self, state: SessionState, _options: &PhaseOptions) -> Result<SessionState> {
        Ok(state)
    }

    /// Called once per candle. The candle has already been appended to `state.candles`.
    fn process(&self, state: SessionState, candle: &Candle) -> Result<(SessionState, Vec<Event>)>;

    /// Called once after the candle stream is exhausted
    fn finalize(&self, state: SessionState) -> Result<(SessionState, Vec<Event>)> {
        Ok((state, Vec::new()))
    }
}
