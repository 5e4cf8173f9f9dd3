//! Error taxonomy for phase execution

use thiserror::Error;

use crate::types::Phase;

/// Problems with how a phase was requested or wired up. Never retried.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("no runner registered for phase {0}")]
    NoRunnerForPhase(Phase),

    #[error("invalid value for option {key}: {value:?}")]
    InvalidOption { key: String, value: String },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The event generator failed; the run is abandoned and state is not committed
    #[error("event generator failed during {phase} phase: {source:#}")]
    Generator {
        phase: Phase,
        last_timestamp: Option<i64>,
        #[source]
        source: anyhow::Error,
    },

    #[error("phase controller is shut down")]
    Closed,
}

impl PipelineError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, PipelineError::Configuration(_))
    }
}
