//! Destinations for events produced by a phase run

use chrono::NaiveDate;
use tracing::warn;

use crate::streams::{AppendOutcome, Broadcaster, EventLog};
use crate::types::{Event, Phase};

/// Ordered, append-only, markable-complete event destination
pub trait EventSink: Send + Sync {
    fn append(&self, events: &[Event]);

    fn mark_complete(&self);
}

/// Writes into the event log entry for one session
#[derive(Debug, Clone)]
pub struct LogSink {
    log: EventLog,
    date: NaiveDate,
    phase: Phase,
}

impl LogSink {
    pub fn new(log: EventLog, date: NaiveDate, phase: Phase) -> Self {
        Self { log, date, phase }
    }
}

impl EventSink for LogSink {
    fn append(&self, events: &[Event]) {
        if self.log.add_events(self.date, self.phase, events) == AppendOutcome::AlreadyComplete {
            warn!(
                date = %self.date,
                phase = %self.phase,
                dropped = events.len(),
                "Session already complete - events not logged"
            );
        }
    }

    fn mark_complete(&self) {
        self.log.mark_complete(self.date, self.phase);
    }
}

/// Publishes to live subscribers of one phase
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    broadcaster: Broadcaster,
    phase: Phase,
}

impl BroadcastSink {
    pub fn new(broadcaster: Broadcaster, phase: Phase) -> Self {
        Self { broadcaster, phase }
    }
}

impl EventSink for BroadcastSink {
    fn append(&self, events: &[Event]) {
        self.broadcaster.publish_all(self.phase, events);
    }

    fn mark_complete(&self) {}
}

/// Fan out to both sinks, first then second
impl<A: EventSink, B: EventSink> EventSink for (A, B) {
    fn append(&self, events: &[Event]) {
        self.0.append(events);
        self.1.append(events);
    }

    fn mark_complete(&self) {
        self.0.mark_complete();
        self.1.mark_complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Candle;

    #[test]
    fn test_pair_feeds_log_and_subscribers() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let log = EventLog::new();
        let hub = Broadcaster::new(100, 16);
        let mut sub = hub.subscribe(Phase::Planning);

        let sink = (
            LogSink::new(log.clone(), date, Phase::Planning),
            BroadcastSink::new(hub.clone(), Phase::Planning),
        );
        let event = Event::Candle(Candle {
            timestamp: 5,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 3.0,
        });
        sink.append(std::slice::from_ref(&event));
        sink.mark_complete();

        let stored = log.get_events(date, Phase::Planning);
        assert_eq!(stored.events, vec![event.clone()]);
        assert!(stored.is_complete);
        assert_eq!(sub.try_recv(), Some(event));
    }
}
