//! Typed session notifications with per-subscriber filtering.
//!
//! Delivery never blocks the audio path: a subscriber whose channel is
//! full misses the event, and one whose receiver was dropped is pruned on
//! the next emit.

use crate::defaults::EVENT_CHANNEL_CAPACITY;
use crate::sync::lock;
use crossbeam_channel::{Receiver, TrySendError, bounded};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The listening loop is running and accepting audio.
    Ready,
    SpeechStart { slot: usize },
    SpeechEnd { slot: usize },
    Hypothesis { slot: usize, text: String },
    Paused,
    Resumed,
    Error { message: String },
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::Ready => EventKind::Ready,
            SessionEvent::SpeechStart { .. } => EventKind::SpeechStart,
            SessionEvent::SpeechEnd { .. } => EventKind::SpeechEnd,
            SessionEvent::Hypothesis { .. } => EventKind::Hypothesis,
            SessionEvent::Paused => EventKind::Paused,
            SessionEvent::Resumed => EventKind::Resumed,
            SessionEvent::Error { .. } => EventKind::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Ready,
    SpeechStart,
    SpeechEnd,
    Hypothesis,
    Paused,
    Resumed,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::Ready,
        EventKind::SpeechStart,
        EventKind::SpeechEnd,
        EventKind::Hypothesis,
        EventKind::Paused,
        EventKind::Resumed,
        EventKind::Error,
    ];
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    pub id: u64,
    pub receiver: Receiver<SessionEvent>,
}

struct Subscriber {
    id: u64,
    kinds: HashSet<EventKind>,
    sender: crossbeam_channel::Sender<SessionEvent>,
}

pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Receive only events whose kind is in `kinds`.
    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        let (sender, receiver) = bounded(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.subscribers).push(Subscriber {
            id,
            kinds: kinds.iter().copied().collect(),
            sender,
        });
        debug!(id, ?kinds, "event subscriber added");
        Subscription { id, receiver }
    }

    pub fn subscribe_all(&self) -> Subscription {
        self.subscribe(&EventKind::ALL)
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        before != subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    pub fn emit(&self, event: SessionEvent) {
        let kind = event.kind();
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|subscriber| {
            if !subscriber.kinds.contains(&kind) {
                return true;
            }
            match subscriber.sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    trace!(id = subscriber.id, ?kind, "subscriber full, event dropped");
                    true
                }
                Err(TrySendError::Disconnected(_)) => {
                    debug!(id = subscriber.id, "pruning disconnected subscriber");
                    false
                }
            }
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
