use anyhow::Result;

use crate::phase::EventGenerator;
use crate::state::SessionState;
use crate::types::{Candle, DaytimeExtreme, Event, ExtremeKind};

/// Tracks the running high and low of the pre-open session.
///
/// Emits a `DaytimeExtreme` every time either side is extended. The first
/// candle of the phase sets both.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtremeTracker;

impl ExtremeTracker {
    fn current(state: &SessionState, kind: ExtremeKind) -> Option<f64> {
        state
            .daytime_extremes
            .iter()
            .rev()
            .find(|e| e.kind == kind)
            .map(|e| e.price)
    }
}

impl EventGenerator for ExtremeTracker {
    fn name(&self) -> &'static str {
        "extreme-tracker"
    }

    fn process(&self, mut state: SessionState, candle: &Candle) -> Result<(SessionState, Vec<Event>)> {
        let mut events = Vec::new();

        let new_high = Self::current(&state, ExtremeKind::High).map_or(true, |h| candle.high > h);
        let new_low = Self::current(&state, ExtremeKind::Low).map_or(true, |l| candle.low < l);

        for (extended, kind, price) in [
            (new_high, ExtremeKind::High, candle.high),
            (new_low, ExtremeKind::Low, candle.low),
        ] {
            if extended {
                let extreme = DaytimeExtreme {
                    timestamp: candle.timestamp,
                    kind,
                    price,
                };
                state.daytime_extremes.push(extreme.clone());
                events.push(Event::DaytimeExtreme(extreme));
            }
        }

        Ok((state, events))
    }
}
