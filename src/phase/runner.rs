//! Drives a candle source through an event generator for one phase

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::generator::EventGenerator;
use super::sink::EventSink;
use super::window::phase_window;
use crate::candles::{CandleSource, CandleWindow};
use crate::config::PhaseOptions;
use crate::error::{ConfigurationError, PipelineError};
use crate::state::SessionState;
use crate::types::{Event, Phase};

/// Where a run stopped after its candle stream was exhausted
#[derive(Debug)]
pub struct RunProgress {
    pub state: SessionState,
    /// Timestamp of the last event appended to the sink, if any
    pub last_timestamp: Option<i64>,
    pub candles_processed: usize,
    /// Events appended to the sink
    pub events_appended: usize,
    /// Stream faults absorbed by retry
    pub retries: u32,
}

pub struct PhaseRunner {
    phase: Phase,
    generator: Arc<dyn EventGenerator>,
    source: Arc<dyn CandleSource>,
    retry_backoff: Duration,
    default_lookback_days: u32,
}

impl PhaseRunner {
    pub fn new(
        phase: Phase,
        generator: Arc<dyn EventGenerator>,
        source: Arc<dyn CandleSource>,
    ) -> Self {
        Self {
            phase,
            generator,
            source,
            retry_backoff: Duration::from_secs(2),
            default_lookback_days: 2,
        }
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.default_lookback_days = days;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn generator_name(&self) -> &'static str {
        self.generator.name()
    }

    /// Candle window for this phase, resumed past any candle already in `state`
    pub fn window(&self, state: &SessionState) -> Result<CandleWindow, ConfigurationError> {
        let lookback = state
            .options
            .planning_lookback_days()?
            .unwrap_or(self.default_lookback_days);
        Ok(phase_window(self.phase, state.trading_date, lookback)
            .resume_after(state.last_candle_timestamp()))
    }

    pub fn initialize(
        &self,
        state: SessionState,
        options: &PhaseOptions,
    ) -> Result<SessionState, PipelineError> {
        self.generator
            .initialize(state, options)
            .map_err(|source| self.generator_error(None, source))
    }

    /// Process every candle in the window, appending events to `sink` in order.
    ///
    /// Stream faults are retried forever after a fixed backoff, resuming after
    /// the last processed candle. Generator faults end the run.
    pub async fn run<S>(&self, state: SessionState, sink: &S) -> Result<RunProgress, PipelineError>
    where
        S: EventSink + ?Sized,
    {
        let mut state = state;
        let mut last_timestamp = None;
        let mut candles_processed = 0usize;
        let mut events_appended = 0usize;
        let mut retries = 0u32;

        loop {
            let window = self.window(&state)?;
            if window.is_empty() {
                debug!(phase = %self.phase, "Window exhausted");
                break;
            }

            let mut candles = self.source.candles(window);
            let mut fault = None;

            while let Some(item) = candles.next().await {
                let candle = match item {
                    Ok(candle) => candle,
                    Err(e) => {
                        fault = Some(e);
                        break;
                    }
                };

                // Only strictly newer candles inside the window are processed
                let stale = state
                    .last_candle_timestamp()
                    .is_some_and(|last| candle.timestamp <= last);
                if stale || !window.contains(candle.timestamp) {
                    debug!(phase = %self.phase, ts = candle.timestamp, "Skipping out-of-window candle");
                    continue;
                }

                let ts = candle.timestamp;
                state.candles.push(candle.clone());
                let (next, events) = self
                    .generator
                    .process(state, &candle)
                    .map_err(|source| self.generator_error(last_timestamp, source))?;
                state = next;

                let mut batch = Vec::with_capacity(events.len() + 1);
                batch.push(Event::Candle(candle));
                batch.extend(events);
                last_timestamp = batch.last().map(Event::timestamp).or(Some(ts));
                sink.append(&batch);
                events_appended += batch.len();
                candles_processed += 1;
            }

            let Some(e) = fault else {
                break;
            };

            retries += 1;
            warn!(
                phase = %self.phase,
                attempt = retries,
                resume_after = ?state.last_candle_timestamp(),
                "Candle stream failed: {:#} - retrying in {:?}",
                e,
                self.retry_backoff
            );
            tokio::time::sleep(self.retry_backoff).await;
        }

        info!(
            phase = %self.phase,
            candles = candles_processed,
            retries,
            "Candle stream complete"
        );

        Ok(RunProgress {
            state,
            last_timestamp,
            candles_processed,
            events_appended,
            retries,
        })
    }

    pub fn finalize(&self, state: SessionState) -> Result<(SessionState, Vec<Event>), PipelineError> {
        let last = state.last_candle_timestamp();
        self.generator
            .finalize(state)
            .map_err(|source| self.generator_error(last, source))
    }

    fn generator_error(&self, last_timestamp: Option<i64>, source: anyhow::Error) -> PipelineError {
        PipelineError::Generator {
            phase: self.phase,
            last_timestamp,
            source,
        }
    }
}
