//! Per-phase publish/subscribe with a bounded replay buffer
//!
//! Each phase owns a topic: a FIFO replay buffer plus the live subscribers'
//! senders. Publishing never waits on a subscriber; every subscriber has its
//! own bounded channel. A subscriber that falls a full channel behind is
//! disconnected rather than silently skipping events, so a stream only ever
//! has the one gap of events evicted before it registered.

use futures::Stream;
use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::types::{Event, Phase};

#[derive(Debug, Default)]
struct Topic {
    buffer: VecDeque<Event>,
    subscribers: Vec<(u64, mpsc::Sender<Event>)>,
}

type Topics = Mutex<HashMap<Phase, Topic>>;

fn lock(topics: &Topics) -> MutexGuard<'_, HashMap<Phase, Topic>> {
    topics.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
pub struct Broadcaster {
    topics: Arc<Topics>,
    capacity: usize,
    subscriber_buffer: usize,
    next_id: Arc<AtomicU64>,
}

impl Broadcaster {
    /// `capacity` events are kept per phase for replay; each subscriber gets a
    /// channel of `subscriber_buffer` slots.
    pub fn new(capacity: usize, subscriber_buffer: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            capacity,
            subscriber_buffer: subscriber_buffer.max(1),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn publish(&self, phase: Phase, event: Event) {
        self.publish_all(phase, std::slice::from_ref(&event));
    }

    pub fn publish_all(&self, phase: Phase, events: &[Event]) {
        if events.is_empty() {
            return;
        }
        let mut topics = lock(&self.topics);
        let topic = topics.entry(phase).or_default();

        for event in events {
            if self.capacity > 0 {
                topic.buffer.push_back(event.clone());
                while topic.buffer.len() > self.capacity {
                    topic.buffer.pop_front();
                }
            }

            topic.subscribers.retain(|(id, tx)| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(%phase, subscriber = id, "Subscriber channel full - disconnecting lagging subscriber");
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(%phase, subscriber = id, "Subscriber gone");
                    false
                }
            });
        }
    }

    /// Register a subscriber. The returned stream yields the current replay
    /// buffer, then every event published afterwards.
    pub fn subscribe(&self, phase: Phase) -> Subscription {
        let (tx, rx) = mpsc::channel(self.subscriber_buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        // Snapshot and registration happen under one lock: nothing published
        // in between can be missed or seen twice.
        let backlog = {
            let mut topics = lock(&self.topics);
            let topic = topics.entry(phase).or_default();
            topic.subscribers.push((id, tx));
            topic.buffer.clone()
        };

        debug!(%phase, subscriber = id, backlog = backlog.len(), "Subscriber registered");

        Subscription {
            id,
            phase,
            backlog,
            rx,
            topics: Arc::downgrade(&self.topics),
        }
    }

    /// Copy of the replay buffer, oldest first
    pub fn replay(&self, phase: Phase) -> Vec<Event> {
        lock(&self.topics)
            .get(&phase)
            .map(|t| t.buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, phase: Phase) -> usize {
        lock(&self.topics)
            .get(&phase)
            .map_or(0, |t| t.subscribers.len())
    }

    /// Drop the replay buffer for a phase; live subscribers stay registered
    pub fn clear(&self, phase: Phase) {
        if let Some(topic) = lock(&self.topics).get_mut(&phase) {
            topic.buffer.clear();
        }
    }
}

/// Replay-then-live event stream for one phase. Unregisters on drop.
pub struct Subscription {
    id: u64,
    phase: Phase,
    backlog: VecDeque<Event>,
    rx: mpsc::Receiver<Event>,
    topics: Weak<Topics>,
}

impl Subscription {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Next event, or `None` once the subscriber was disconnected
    pub async fn recv(&mut self) -> Option<Event> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        self.rx.recv().await
    }

    /// Next event if one is ready right now
    pub fn try_recv(&mut self) -> Option<Event> {
        self.backlog
            .pop_front()
            .or_else(|| self.rx.try_recv().ok())
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        let this = self.get_mut();
        if let Some(event) = this.backlog.pop_front() {
            return Poll::Ready(Some(event));
        }
        this.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(topics) = self.topics.upgrade() else {
            return;
        };
        if let Some(topic) = lock(&topics).get_mut(&self.phase) {
            topic.subscribers.retain(|(id, _)| *id != self.id);
        }
        debug!(phase = %self.phase, subscriber = self.id, "Subscriber unregistered");
    }
}
