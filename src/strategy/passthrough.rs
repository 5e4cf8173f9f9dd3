use anyhow::Result;

use crate::phase::EventGenerator;
use crate::state::SessionState;
use crate::types::{Candle, Event};

/// Emits nothing beyond the candle events the runner adds
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl EventGenerator for Passthrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn process(&self, state: SessionState, _candle: &Candle) -> Result<(SessionState, Vec<Event>)> {
        Ok((state, Vec::new()))
    }
}
