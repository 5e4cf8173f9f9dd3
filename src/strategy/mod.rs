//! Reference event generators, one per phase
//!
//! - Planning: swing pivots, then supply/demand zones from the latest pivots
//! - Preparing: pre-open range extremes
//! - Trading: zone retest orders with fixed reward multiple

mod extremes;
mod passthrough;
mod swing;
mod zone_retest;

pub use extremes::ExtremeTracker;
pub use passthrough::Passthrough;
pub use swing::{SwingConfig, SwingDetector};
pub use zone_retest::{ZoneRetest, ZoneRetestConfig};

use std::sync::Arc;

use crate::phase::EventGenerator;
use crate::types::Phase;

/// Default strategy binding for a phase
pub fn generator_for(phase: Phase) -> Arc<dyn EventGenerator> {
    match phase {
        Phase::Planning => Arc::new(SwingDetector::new(SwingConfig::default())),
        Phase::Preparing => Arc::new(ExtremeTracker),
        Phase::Trading => Arc::new(ZoneRetest::new(ZoneRetestConfig::default())),
    }
}
