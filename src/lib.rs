// Library crate - phase execution and event distribution for candle replays

pub mod api;
pub mod candles;
pub mod config;
pub mod error;
pub mod phase;
pub mod state;
pub mod streams;
pub mod strategy;
pub mod types;

// Re-export commonly used types
pub use config::{PhaseOptions, PipelineConfig};
pub use error::{ConfigurationError, PipelineError};
pub use phase::{PhaseController, PhaseOutcome};
pub use types::*;

use std::sync::Arc;

use candles::CandleSource;
use phase::PhaseRunner;
use streams::{Broadcaster, EventLog};

/// Controller with the default strategy bound to every phase, all reading from `source`
pub fn build_controller(config: &PipelineConfig, source: Arc<dyn CandleSource>) -> PhaseController {
    let broadcaster = Broadcaster::new(config.replay_capacity, config.subscriber_buffer);
    Phase::ALL.iter().fold(
        PhaseController::new(EventLog::new(), broadcaster),
        |controller, &phase| {
            controller.with_runner(
                PhaseRunner::new(phase, strategy::generator_for(phase), Arc::clone(&source))
                    .with_retry_backoff(config.retry_backoff)
                    .with_lookback_days(config.planning_lookback_days),
            )
        },
    )
}
