//! In-memory event log, one entry per (trading date, phase)
//!
//! Entries are append-only until marked complete. Appends after completion are
//! refused and reported back as [`AppendOutcome::AlreadyComplete`] so callers
//! can log the condition; the stored events never change once complete.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::types::{Event, Phase};

/// Identifies one session's log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionKey {
    #[serde(rename = "tradingDate")]
    pub trading_date: NaiveDate,
    pub phase: Phase,
}

impl SessionKey {
    pub fn new(trading_date: NaiveDate, phase: Phase) -> Self {
        Self {
            trading_date,
            phase,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Accepted,
    AlreadyComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    NotStarted,
    Running,
    Complete,
}

/// Snapshot returned to polling consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionEvents {
    pub events: Vec<Event>,
    #[serde(rename = "isComplete")]
    pub is_complete: bool,
}

#[derive(Debug, Default)]
struct LogEntry {
    events: Vec<Event>,
    complete: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<BTreeMap<SessionKey, LogEntry>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<SessionKey, LogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the entry for a run (NotStarted -> Running). Existing entries are left alone.
    pub fn begin(&self, date: NaiveDate, phase: Phase) {
        self.entries()
            .entry(SessionKey::new(date, phase))
            .or_default();
    }

    pub fn add_event(&self, date: NaiveDate, phase: Phase, event: Event) -> AppendOutcome {
        self.add_events(date, phase, std::slice::from_ref(&event))
    }

    pub fn add_events(&self, date: NaiveDate, phase: Phase, events: &[Event]) -> AppendOutcome {
        let mut entries = self.entries();
        let entry = entries.entry(SessionKey::new(date, phase)).or_default();
        if entry.complete {
            return AppendOutcome::AlreadyComplete;
        }
        entry.events.extend_from_slice(events);
        AppendOutcome::Accepted
    }

    pub fn mark_complete(&self, date: NaiveDate, phase: Phase) {
        self.entries()
            .entry(SessionKey::new(date, phase))
            .or_default()
            .complete = true;
    }

    pub fn is_complete(&self, date: NaiveDate, phase: Phase) -> bool {
        self.entries()
            .get(&SessionKey::new(date, phase))
            .is_some_and(|e| e.complete)
    }

    pub fn status(&self, date: NaiveDate, phase: Phase) -> SessionStatus {
        match self.entries().get(&SessionKey::new(date, phase)) {
            None => SessionStatus::NotStarted,
            Some(e) if e.complete => SessionStatus::Complete,
            Some(_) => SessionStatus::Running,
        }
    }

    pub fn get_events(&self, date: NaiveDate, phase: Phase) -> SessionEvents {
        match self.entries().get(&SessionKey::new(date, phase)) {
            Some(e) => SessionEvents {
                events: e.events.clone(),
                is_complete: e.complete,
            },
            None => SessionEvents {
                events: Vec::new(),
                is_complete: false,
            },
        }
    }

    /// Reset one session to NotStarted
    pub fn clear(&self, date: NaiveDate, phase: Phase) {
        self.entries().remove(&SessionKey::new(date, phase));
    }

    pub fn clear_all(&self) {
        self.entries().clear();
    }

    /// Sorted distinct dates with at least one stored event
    pub fn available_dates(&self) -> Vec<NaiveDate> {
        self.entries()
            .iter()
            .filter(|(_, e)| !e.events.is_empty())
            .map(|(k, _)| k.trading_date)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Candle;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
    }

    fn candle_event(ts: i64) -> Event {
        Event::Candle(Candle {
            timestamp: ts,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10.0,
        })
    }

    #[test]
    fn test_append_after_complete_is_rejected() {
        let log = EventLog::new();
        assert_eq!(
            log.add_event(date(14), Phase::Planning, candle_event(1)),
            AppendOutcome::Accepted
        );
        log.mark_complete(date(14), Phase::Planning);

        assert_eq!(
            log.add_event(date(14), Phase::Planning, candle_event(2)),
            AppendOutcome::AlreadyComplete
        );

        let stored = log.get_events(date(14), Phase::Planning);
        assert!(stored.is_complete);
        assert_eq!(stored.events, vec![candle_event(1)]);
    }

    #[test]
    fn test_session_status_transitions() {
        let log = EventLog::new();
        assert_eq!(log.status(date(14), Phase::Trading), SessionStatus::NotStarted);

        log.begin(date(14), Phase::Trading);
        assert_eq!(log.status(date(14), Phase::Trading), SessionStatus::Running);

        log.mark_complete(date(14), Phase::Trading);
        assert_eq!(log.status(date(14), Phase::Trading), SessionStatus::Complete);

        log.clear(date(14), Phase::Trading);
        assert_eq!(log.status(date(14), Phase::Trading), SessionStatus::NotStarted);
        assert!(!log.is_complete(date(14), Phase::Trading));
    }

    #[test]
    fn test_keys_are_independent() {
        let log = EventLog::new();
        log.add_events(date(14), Phase::Planning, &[candle_event(1), candle_event(2)]);
        log.mark_complete(date(14), Phase::Planning);

        assert_eq!(
            log.add_event(date(14), Phase::Preparing, candle_event(3)),
            AppendOutcome::Accepted
        );
        assert_eq!(
            log.add_event(date(13), Phase::Planning, candle_event(0)),
            AppendOutcome::Accepted
        );
        assert_eq!(log.get_events(date(14), Phase::Planning).events.len(), 2);
        assert_eq!(log.get_events(date(14), Phase::Preparing).events.len(), 1);
    }

    #[test]
    fn test_available_dates_sorted_and_distinct() {
        let log = EventLog::new();
        log.add_event(date(20), Phase::Planning, candle_event(1));
        log.add_event(date(12), Phase::Planning, candle_event(1));
        log.add_event(date(12), Phase::Trading, candle_event(2));
        // An opened entry with no events does not count
        log.begin(date(25), Phase::Planning);

        assert_eq!(log.available_dates(), vec![date(12), date(20)]);

        log.clear_all();
        assert!(log.available_dates().is_empty());
    }
}
