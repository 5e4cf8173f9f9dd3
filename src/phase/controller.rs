//! Phase controller - single entry point for running phases
//!
//! One execution permit is shared by every phase and date, so at most one
//! runner is ever processing candles. Canonical session state lives in a
//! watch channel that only the controller writes; it is replaced in one step
//! after a successful run and never touched by a failed or cancelled one.

use chrono::{NaiveDate, Utc};
use chrono_tz::America::New_York;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::runner::PhaseRunner;
use super::sink::{BroadcastSink, EventSink, LogSink};
use crate::config::PhaseOptions;
use crate::error::{ConfigurationError, PipelineError};
use crate::state::{SessionState, StateView, StatusSnapshot};
use crate::streams::{Broadcaster, EventLog, SessionKey, SessionStatus, Subscription};
use crate::types::{Event, Phase};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum PhaseOutcome {
    Completed {
        phase: Phase,
        #[serde(rename = "tradingDate")]
        trading_date: NaiveDate,
        candles: usize,
        events: usize,
        retries: u32,
        #[serde(rename = "lastTimestamp")]
        last_timestamp: i64,
    },
    /// The event log already holds a complete session for this key
    AlreadyComplete {
        phase: Phase,
        #[serde(rename = "tradingDate")]
        trading_date: NaiveDate,
    },
}

pub struct PhaseController {
    permit: Semaphore,
    runners: HashMap<Phase, PhaseRunner>,
    state: watch::Sender<Arc<SessionState>>,
    running: Mutex<Option<SessionKey>>,
    log: EventLog,
    broadcaster: Broadcaster,
}

/// Clears the running marker however the run ends, including cancellation
struct RunningGuard<'a>(&'a Mutex<Option<SessionKey>>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Drops the run's log entry unless the run reached `Ok` or `Err`
struct PartialRun<'a> {
    log: &'a EventLog,
    key: SessionKey,
    settled: bool,
}

impl Drop for PartialRun<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let SessionKey { trading_date, phase } = self.key;
            warn!(date = %trading_date, %phase, "Run cancelled - discarding partial events");
            self.log.clear(trading_date, phase);
        }
    }
}

struct Finished {
    state: SessionState,
    trailing: Vec<Event>,
    last_timestamp: Option<i64>,
    candles: usize,
    events: usize,
    retries: u32,
}

impl PhaseController {
    pub fn new(log: EventLog, broadcaster: Broadcaster) -> Self {
        let today = Utc::now().with_timezone(&New_York).date_naive();
        let (state, _) = watch::channel(Arc::new(SessionState::new(today, PhaseOptions::new())));
        Self {
            permit: Semaphore::new(1),
            runners: HashMap::new(),
            state,
            running: Mutex::new(None),
            log,
            broadcaster,
        }
    }

    /// Bind a runner to its phase, replacing any previous binding
    pub fn with_runner(mut self, runner: PhaseRunner) -> Self {
        info!(
            phase = %runner.phase(),
            generator = runner.generator_name(),
            "Runner registered"
        );
        self.runners.insert(runner.phase(), runner);
        self
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn subscribe(&self, phase: Phase) -> Subscription {
        self.broadcaster.subscribe(phase)
    }

    /// Read-only view of the canonical session state
    pub fn state_view(&self) -> StateView {
        StateView::new(self.state.subscribe())
    }

    pub fn running(&self) -> Option<SessionKey> {
        *self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> StatusSnapshot {
        self.state
            .borrow()
            .snapshot(self.running().map(|key| key.phase))
    }

    /// Trading date for a request: explicit option, else the canonical session's date
    pub fn resolve_trading_date(&self, options: &PhaseOptions) -> Result<NaiveDate, PipelineError> {
        Ok(match options.trading_date()? {
            Some(date) => date,
            None => self.state.borrow().trading_date,
        })
    }

    /// Run `phase` to completion. Waits for any other phase run to finish first.
    ///
    /// Dropping the returned future cancels the run: nothing is committed, no
    /// terminal event is emitted and the partial log entry is discarded.
    pub async fn start_phase(
        &self,
        phase: Phase,
        options: PhaseOptions,
    ) -> Result<PhaseOutcome, PipelineError> {
        let date = self.resolve_trading_date(&options)?;
        if self.log.is_complete(date, phase) {
            info!(%date, %phase, "Session already complete - skipping run");
            return Ok(PhaseOutcome::AlreadyComplete {
                phase,
                trading_date: date,
            });
        }

        let _permit = self.permit.acquire().await.map_err(|_| PipelineError::Closed)?;

        let runner = self
            .runners
            .get(&phase)
            .ok_or(ConfigurationError::NoRunnerForPhase(phase))?;

        // Bad options are rejected before anything is logged or published
        let initial = self.initial_state(phase, date, &options);
        let window = runner.window(&initial)?;

        // Another caller may have completed the same key while we waited
        match self.log.status(date, phase) {
            SessionStatus::Complete => {
                return Ok(PhaseOutcome::AlreadyComplete {
                    phase,
                    trading_date: date,
                });
            }
            SessionStatus::Running => {
                warn!(%date, %phase, "Discarding partial events from an earlier failed run");
                self.log.clear(date, phase);
            }
            SessionStatus::NotStarted => {}
        }

        let key = SessionKey::new(date, phase);
        *self.running.lock().unwrap_or_else(PoisonError::into_inner) = Some(key);
        let _running = RunningGuard(&self.running);

        self.log.begin(date, phase);
        let mut partial = PartialRun {
            log: &self.log,
            key,
            settled: false,
        };
        let sink = (
            LogSink::new(self.log.clone(), date, phase),
            BroadcastSink::new(self.broadcaster.clone(), phase),
        );

        info!(%date, %phase, generator = runner.generator_name(), "Phase starting");

        let result = async {
            let state = runner.initialize(initial, &options)?;
            let progress = runner.run(state, &sink).await?;
            let (mut state, trailing) = runner.finalize(progress.state)?;
            if !state.completed_phases.contains(&phase) {
                state.completed_phases.push(phase);
            }
            Ok::<_, PipelineError>(Finished {
                state,
                trailing,
                last_timestamp: progress.last_timestamp,
                candles: progress.candles_processed,
                events: progress.events_appended,
                retries: progress.retries,
            })
        }
        .await;
        partial.settled = true;

        match result {
            Ok(finished) => {
                sink.append(&finished.trailing);
                let last_timestamp = finished
                    .trailing
                    .last()
                    .map(Event::timestamp)
                    .or(finished.last_timestamp)
                    .unwrap_or(window.start);

                self.state.send_replace(Arc::new(finished.state));

                sink.append(&[Event::PhaseComplete {
                    timestamp: last_timestamp,
                    phase,
                    trading_date: date,
                }]);
                sink.mark_complete();

                // Run events, trailing events, PhaseComplete
                let events = finished.events + finished.trailing.len() + 1;
                let (candles, retries) = (finished.candles, finished.retries);
                info!(%date, %phase, candles, events, retries, "Phase complete");

                Ok(PhaseOutcome::Completed {
                    phase,
                    trading_date: date,
                    candles,
                    events,
                    retries,
                    last_timestamp,
                })
            }
            Err(e) => {
                let timestamp = match &e {
                    PipelineError::Generator { last_timestamp, .. } => *last_timestamp,
                    _ => None,
                }
                .unwrap_or(window.start);

                error!(%date, %phase, "Phase failed: {}", e);
                sink.append(&[Event::PhaseErrored {
                    timestamp,
                    phase,
                    trading_date: date,
                    message: e.to_string(),
                }]);
                Err(e)
            }
        }
    }

    /// Run `phase` on a background task. The caller owns the handle and may
    /// join or abort it; aborting is a cancellation.
    pub fn spawn_phase(
        self: &Arc<Self>,
        phase: Phase,
        options: PhaseOptions,
    ) -> JoinHandle<Result<PhaseOutcome, PipelineError>> {
        let controller = Arc::clone(self);
        tokio::spawn(async move { controller.start_phase(phase, options).await })
    }

    /// Stop accepting runs. Callers waiting on the permit get `PipelineError::Closed`.
    pub fn close(&self) {
        self.permit.close();
    }

    fn initial_state(&self, phase: Phase, date: NaiveDate, options: &PhaseOptions) -> SessionState {
        let canonical = self.state.borrow().clone();
        if phase.is_session_start() || canonical.trading_date != date {
            let mut seeded = options.clone();
            if seeded.trading_date().ok().flatten().is_none() {
                seeded = seeded.with(
                    crate::config::OPT_TRADING_DATE,
                    date.format("%Y-%m-%d").to_string(),
                );
            }
            return SessionState::new(date, seeded);
        }

        let mut state = (*canonical).clone();
        state.options.merge(options);
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candles::{CandleSource, CandleWindow, MemoryCandleSource};
    use crate::phase::window::phase_window;
    use crate::phase::EventGenerator;
    use crate::types::Candle;
    use anyhow::{anyhow, Result};
    use futures::stream::BoxStream;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    const MINUTE: i64 = 60_000;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn candles_for(phase: Phase, n: usize) -> Vec<Candle> {
        let start = phase_window(phase, date(), 2).start;
        (0..n)
            .map(|i| Candle {
                timestamp: start + i as i64 * MINUTE,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.5,
                volume: 1.0,
            })
            .collect()
    }

    struct Identity;

    impl EventGenerator for Identity {
        fn name(&self) -> &'static str {
            "identity"
        }

        fn process(&self, state: SessionState, _candle: &Candle) -> Result<(SessionState, Vec<Event>)> {
            Ok((state, Vec::new()))
        }
    }

    struct Exploding;

    impl EventGenerator for Exploding {
        fn name(&self) -> &'static str {
            "exploding"
        }

        fn process(&self, state: SessionState, candle: &Candle) -> Result<(SessionState, Vec<Event>)> {
            if state.candles.len() == 3 {
                return Err(anyhow!("division by zero at {}", candle.timestamp));
            }
            Ok((state, Vec::new()))
        }
    }

    /// Flags any moment where two runs are between initialize and finalize
    struct OverlapProbe {
        active: Arc<AtomicBool>,
        overlaps: Arc<AtomicUsize>,
    }

    impl EventGenerator for OverlapProbe {
        fn name(&self) -> &'static str {
            "overlap-probe"
        }

        fn initialize(&self, state: SessionState, _options: &PhaseOptions) -> Result<SessionState> {
            if self.active.swap(true, Ordering::SeqCst) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            Ok(state)
        }

        fn process(&self, state: SessionState, _candle: &Candle) -> Result<(SessionState, Vec<Event>)> {
            Ok((state, Vec::new()))
        }

        fn finalize(&self, state: SessionState) -> Result<(SessionState, Vec<Event>)> {
            self.active.store(false, Ordering::SeqCst);
            Ok((state, Vec::new()))
        }
    }

    /// Never yields a candle
    struct Stalled;

    impl CandleSource for Stalled {
        fn candles(&self, _window: CandleWindow) -> BoxStream<'static, Result<Candle>> {
            use futures::StreamExt;
            futures::stream::pending().boxed()
        }
    }

    fn controller_with(phase: Phase, generator: Arc<dyn EventGenerator>, candles: Vec<Candle>) -> PhaseController {
        PhaseController::new(EventLog::new(), Broadcaster::new(10_000, 1_024)).with_runner(
            PhaseRunner::new(phase, generator, Arc::new(MemoryCandleSource::new(candles)))
                .with_retry_backoff(Duration::from_millis(5)),
        )
    }

    #[tokio::test]
    async fn test_identity_run_publishes_candles_then_complete() {
        let candles = candles_for(Phase::Planning, 5);
        let controller = controller_with(Phase::Planning, Arc::new(Identity), candles.clone());
        let mut sub = controller.subscribe(Phase::Planning);

        let outcome = controller
            .start_phase(Phase::Planning, PhaseOptions::for_date(date()))
            .await
            .unwrap();

        let mut published = Vec::new();
        while let Some(event) = sub.try_recv() {
            published.push(event);
        }
        assert_eq!(published.len(), 6);
        for (event, candle) in published.iter().zip(&candles) {
            assert_eq!(event, &Event::Candle(candle.clone()));
        }
        assert_eq!(
            published[5],
            Event::PhaseComplete {
                timestamp: candles[4].timestamp,
                phase: Phase::Planning,
                trading_date: date(),
            }
        );

        assert!(controller.event_log().is_complete(date(), Phase::Planning));
        assert_eq!(controller.event_log().get_events(date(), Phase::Planning).events, published);
        assert!(matches!(outcome, PhaseOutcome::Completed { candles: 5, events: 6, .. }));

        let state = controller.state_view().current();
        assert_eq!(state.candles.len(), 5);
        assert_eq!(state.completed_phases, vec![Phase::Planning]);
        assert!(controller.running().is_none());
    }

    #[tokio::test]
    async fn test_completed_session_is_skipped() {
        let controller = controller_with(Phase::Planning, Arc::new(Identity), candles_for(Phase::Planning, 2));
        controller.start_phase(Phase::Planning, PhaseOptions::for_date(date())).await.unwrap();
        let again = controller
            .start_phase(Phase::Planning, PhaseOptions::for_date(date()))
            .await
            .unwrap();

        assert!(matches!(again, PhaseOutcome::AlreadyComplete { .. }));
        assert_eq!(controller.event_log().get_events(date(), Phase::Planning).events.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_runner_is_configuration_error() {
        let controller = controller_with(Phase::Planning, Arc::new(Identity), Vec::new());
        let err = controller
            .start_phase(Phase::Trading, PhaseOptions::for_date(date()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Configuration(ConfigurationError::NoRunnerForPhase(Phase::Trading))
        ));

        // The permit was released
        let ok = controller.start_phase(Phase::Planning, PhaseOptions::for_date(date())).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn test_generator_fault_emits_errored_and_keeps_state() {
        let candles = candles_for(Phase::Planning, 6);
        let controller = controller_with(Phase::Planning, Arc::new(Exploding), candles.clone());
        let before = controller.state_view().current();

        let err = controller
            .start_phase(Phase::Planning, PhaseOptions::for_date(date()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Generator { .. }));

        let logged = controller.event_log().get_events(date(), Phase::Planning);
        assert!(!logged.is_complete);
        assert_eq!(
            controller.event_log().status(date(), Phase::Planning),
            SessionStatus::Running
        );
        match logged.events.last() {
            Some(Event::PhaseErrored { timestamp, phase, .. }) => {
                assert_eq!(*phase, Phase::Planning);
                assert_eq!(*timestamp, candles[1].timestamp);
            }
            other => panic!("expected PhaseErrored, got {:?}", other),
        }
        assert_eq!(controller.state_view().current(), before);
        assert_eq!(controller.broadcaster().replay(Phase::Planning).last(), logged.events.last());
    }

    #[tokio::test]
    async fn test_rerun_after_failure_starts_clean() {
        let candles = candles_for(Phase::Planning, 4);
        let controller = controller_with(Phase::Planning, Arc::new(Exploding), candles.clone());
        let _ = controller.start_phase(Phase::Planning, PhaseOptions::for_date(date())).await;
        let _ = controller.start_phase(Phase::Planning, PhaseOptions::for_date(date())).await;

        let logged = controller.event_log().get_events(date(), Phase::Planning);
        let errored = logged
            .events
            .iter()
            .filter(|e| matches!(e, Event::PhaseErrored { .. }))
            .count();
        assert_eq!(errored, 1);
        assert_eq!(logged.events.len(), 3);
    }

    #[tokio::test]
    async fn test_runs_never_overlap() {
        let active = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let probe = || -> Arc<dyn EventGenerator> {
            Arc::new(OverlapProbe {
                active: active.clone(),
                overlaps: overlaps.clone(),
            })
        };
        let paced = |phase| {
            Arc::new(MemoryCandleSource::new(candles_for(phase, 5)).with_pace(Duration::from_millis(2)))
        };

        let controller = Arc::new(
            PhaseController::new(EventLog::new(), Broadcaster::new(100, 64))
                .with_runner(PhaseRunner::new(Phase::Planning, probe(), paced(Phase::Planning)))
                .with_runner(PhaseRunner::new(Phase::Trading, probe(), paced(Phase::Trading))),
        );

        let other_date = NaiveDate::from_ymd_opt(2025, 3, 13).unwrap();
        let a = controller.spawn_phase(Phase::Planning, PhaseOptions::for_date(date()));
        let b = controller.spawn_phase(Phase::Trading, PhaseOptions::for_date(date()));
        let c = controller.spawn_phase(Phase::Planning, PhaseOptions::for_date(other_date));

        for handle in [a, b, c] {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_discards_partial_events() {
        let candles = candles_for(Phase::Planning, 50);
        let source = MemoryCandleSource::new(candles).with_pace(Duration::from_millis(5));
        let controller = Arc::new(
            PhaseController::new(EventLog::new(), Broadcaster::new(100, 64))
                .with_runner(PhaseRunner::new(Phase::Planning, Arc::new(Identity), Arc::new(source))),
        );
        let before = controller.state_view().current();

        let handle = controller.spawn_phase(Phase::Planning, PhaseOptions::for_date(date()));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(controller.running().is_some());
        assert!(!controller.event_log().get_events(date(), Phase::Planning).events.is_empty());

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        assert!(controller.running().is_none());
        assert_eq!(
            controller.event_log().status(date(), Phase::Planning),
            SessionStatus::NotStarted
        );
        assert!(controller.event_log().get_events(date(), Phase::Planning).events.is_empty());
        assert!(controller.event_log().available_dates().is_empty());
        assert!(!controller
            .broadcaster()
            .replay(Phase::Planning)
            .iter()
            .any(|e| matches!(e, Event::PhaseComplete { .. } | Event::PhaseErrored { .. })));
        assert_eq!(controller.state_view().current(), before);
    }

    #[tokio::test]
    async fn test_cancel_while_stalled_leaves_no_trace() {
        let controller = Arc::new(
            PhaseController::new(EventLog::new(), Broadcaster::new(100, 64))
                .with_runner(PhaseRunner::new(Phase::Planning, Arc::new(Identity), Arc::new(Stalled))),
        );

        let handle = controller.spawn_phase(Phase::Planning, PhaseOptions::for_date(date()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        assert!(controller.broadcaster().replay(Phase::Planning).is_empty());
        assert!(!controller.event_log().is_complete(date(), Phase::Planning));
        assert_eq!(
            controller.event_log().status(date(), Phase::Planning),
            SessionStatus::NotStarted
        );
    }

    #[tokio::test]
    async fn test_bad_option_rejected_before_logging() {
        let controller = controller_with(Phase::Planning, Arc::new(Identity), candles_for(Phase::Planning, 3));
        let options = PhaseOptions::for_date(date()).with(crate::config::OPT_PLANNING_LOOKBACK_DAYS, "x");

        let err = controller.start_phase(Phase::Planning, options).await.unwrap_err();
        assert!(err.is_configuration());
        assert!(matches!(
            err,
            PipelineError::Configuration(ConfigurationError::InvalidOption { .. })
        ));

        assert_eq!(
            controller.event_log().status(date(), Phase::Planning),
            SessionStatus::NotStarted
        );
        assert!(controller.broadcaster().replay(Phase::Planning).is_empty());
        assert!(controller.running().is_none());

        // The permit was released
        let ok = controller.start_phase(Phase::Planning, PhaseOptions::for_date(date())).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn test_continuation_phase_builds_on_committed_state() {
        let controller = PhaseController::new(EventLog::new(), Broadcaster::new(100, 64))
            .with_runner(PhaseRunner::new(
                Phase::Planning,
                Arc::new(Identity),
                Arc::new(MemoryCandleSource::new(candles_for(Phase::Planning, 3))),
            ))
            .with_runner(PhaseRunner::new(
                Phase::Preparing,
                Arc::new(Identity),
                Arc::new(MemoryCandleSource::new(candles_for(Phase::Preparing, 2))),
            ));

        controller.start_phase(Phase::Planning, PhaseOptions::for_date(date())).await.unwrap();
        controller
            .start_phase(Phase::Preparing, PhaseOptions::new().with("note", "x"))
            .await
            .unwrap();

        let state = controller.state_view().current();
        assert_eq!(state.candles.len(), 5);
        assert_eq!(state.completed_phases, vec![Phase::Planning, Phase::Preparing]);
        assert_eq!(state.options.get("note"), Some("x"));
        assert_eq!(controller.status().completed_phases.len(), 2);
    }

    #[tokio::test]
    async fn test_closed_controller_refuses_runs() {
        let controller = controller_with(Phase::Planning, Arc::new(Identity), Vec::new());
        controller.close();
        let err = controller
            .start_phase(Phase::Planning, PhaseOptions::for_date(date()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Closed));
    }
}
