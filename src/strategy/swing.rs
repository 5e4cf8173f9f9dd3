//! Swing pivots and the supply/demand zones derived from them
//!
//! A pivot high is a candle whose high is strictly above the `strength`
//! candles on either side (pivot low mirrors it). A pivot is only known once
//! the right-hand side has printed, so the event is stamped with the
//! confirming candle and carries the pivot's own timestamp separately.

use anyhow::Result;
use uuid::Uuid;

use crate::phase::EventGenerator;
use crate::state::SessionState;
use crate::types::{Candle, Event, PlanZone, SwingKind, SwingPoint, ZoneKind};

#[derive(Debug, Clone)]
pub struct SwingConfig {
    /// Candles required on each side of a pivot
    pub strength: usize,
    /// Zones kept per side (most recent pivots first)
    pub max_zones_per_side: usize,
    /// Minimum zone height in points
    pub min_zone_height: f64,
}

impl Default for SwingConfig {
    fn default() -> Self {
        Self {
            strength: 3,
            max_zones_per_side: 3,
            min_zone_height: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SwingDetector {
    config: SwingConfig,
}

impl SwingDetector {
    pub fn new(config: SwingConfig) -> Self {
        Self { config }
    }

    fn pivot_at(&self, candles: &[Candle], idx: usize) -> Option<SwingKind> {
        let k = self.config.strength;
        let pivot = &candles[idx];
        let neighbours = candles[idx - k..=idx + k]
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != k)
            .map(|(_, c)| c);

        let (mut is_high, mut is_low) = (true, true);
        for c in neighbours {
            is_high &= pivot.high > c.high;
            is_low &= pivot.low < c.low;
        }

        match (is_high, is_low) {
            (true, false) => Some(SwingKind::High),
            (false, true) => Some(SwingKind::Low),
            // Outside bar that is both: ambiguous, skip
            _ => None,
        }
    }

    fn zone_for(&self, pivot: &Candle, kind: SwingKind, timestamp: i64) -> PlanZone {
        let min = self.config.min_zone_height;
        let (kind, low, high) = match kind {
            SwingKind::High => {
                let low = pivot.body_high().min(pivot.high - min);
                (ZoneKind::Supply, low, pivot.high)
            }
            SwingKind::Low => {
                let high = pivot.body_low().max(pivot.low + min);
                (ZoneKind::Demand, pivot.low, high)
            }
        };
        PlanZone {
            id: Uuid::new_v4(),
            timestamp,
            kind,
            low,
            high,
            touched: false,
        }
    }
}

impl EventGenerator for SwingDetector {
    fn name(&self) -> &'static str {
        "swing-detector"
    }

    fn process(&self, mut state: SessionState, candle: &Candle) -> Result<(SessionState, Vec<Event>)> {
        let k = self.config.strength;
        let n = state.candles.len();
        if k == 0 || n < 2 * k + 1 {
            return Ok((state, Vec::new()));
        }

        let idx = n - 1 - k;
        let Some(kind) = self.pivot_at(&state.candles, idx) else {
            return Ok((state, Vec::new()));
        };

        let pivot = &state.candles[idx];
        let swing = SwingPoint {
            timestamp: candle.timestamp,
            pivot_timestamp: pivot.timestamp,
            price: match kind {
                SwingKind::High => pivot.high,
                SwingKind::Low => pivot.low,
            },
            kind,
        };
        state.swing_points.push(swing.clone());
        Ok((state, vec![Event::SwingPoint(swing)]))
    }

    fn finalize(&self, mut state: SessionState) -> Result<(SessionState, Vec<Event>)> {
        let Some(stamp) = state.last_candle_timestamp() else {
            return Ok((state, Vec::new()));
        };

        let mut zones = Vec::new();
        for kind in [SwingKind::High, SwingKind::Low] {
            let recent = state
                .swing_points
                .iter()
                .rev()
                .filter(|s| s.kind == kind)
                .take(self.config.max_zones_per_side);
            for swing in recent {
                let found = state
                    .candles
                    .binary_search_by_key(&swing.pivot_timestamp, |c| c.timestamp);
                if let Ok(i) = found {
                    zones.push(self.zone_for(&state.candles[i], kind, stamp));
                }
            }
        }

        state.plan_zones.extend(zones.iter().cloned());
        Ok((state, zones.into_iter().map(Event::PlanZone).collect()))
    }
}
