// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Typed, in-process publish/subscribe bus.
//!
//! Each subscriber gets its own bounded queue. `publish` drops an event for
//! a subscriber whose queue is full rather than blocking the producer or
//! lagging every other subscriber (the `tokio::sync::broadcast` failure
//! mode); `publish_sync` instead waits for every subscriber to enqueue, for
//! the few call sites that need strict ordering relative to what happens
//! next (e.g. `session.created` must reach subscribers before the HTTP
//! response that created it returns).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

/// Default bound for a subscriber's event queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A single bus event. `r#type` is the wire identifier (`session.created`, …).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    pub session_id: Option<String>,
    pub properties: Value,
    pub seq: u64,
}

impl Event {
    pub fn new(kind: impl Into<String>, session_id: Option<String>, properties: Value) -> Self {
        Self {
            kind: kind.into(),
            session_id,
            properties,
            seq: 0,
        }
    }

    /// Render as the wire SSE payload: `{"type":"...","properties":{...}}`.
    pub fn to_wire_json(&self) -> Value {
        serde_json::json!({ "type": self.kind, "properties": self.properties })
    }
}

/// Subscription filter.
#[derive(Debug, Clone)]
pub enum Filter {
    All,
    Types(std::collections::HashSet<String>),
    Session(String),
}

impl Filter {
    fn matches(&self, event: &Event) -> bool {
        match self {
            Filter::All => true,
            Filter::Types(types) => types.contains(&event.kind),
            Filter::Session(id) => event.session_id.as_deref() == Some(id.as_str()),
        }
    }
}

struct Subscriber {
    filter: Filter,
    sender: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

/// A live subscription: an event receiver plus a dropped-event counter.
/// Dropping this value (or calling [`Subscription::unsubscribe`]) removes
/// the subscriber from the bus.
pub struct Subscription {
    pub id: u64,
    pub receiver: mpsc::Receiver<Event>,
    dropped: Arc<AtomicU64>,
    bus: EventBus,
}

impl Subscription {
    /// Number of events dropped for this subscriber due to a full queue.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn unsubscribe(self) {
        self.bus.unsubscribe(self.id).await;
    }
}

#[derive(Default)]
struct Inner {
    subscribers: HashMap<u64, Subscriber>,
    next_id: u64,
}

/// Process-global typed pub/sub bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<RwLock<Inner>>,
    seq: Arc<AtomicU64>,
    queue_capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            seq: Arc::new(AtomicU64::new(0)),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn with_queue_capacity(capacity: usize) -> Self {
        Self {
            queue_capacity: capacity,
            ..Self::new()
        }
    }

    pub async fn subscribe(&self, filter: Filter) -> Subscription {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let mut guard = self.inner.write().await;
        let id = guard.next_id;
        guard.next_id += 1;
        guard.subscribers.insert(
            id,
            Subscriber {
                filter,
                sender: tx,
                dropped: dropped.clone(),
            },
        );
        Subscription {
            id,
            receiver: rx,
            dropped,
            bus: self.clone(),
        }
    }

    pub async fn unsubscribe(&self, id: u64) {
        self.inner.write().await.subscribers.remove(&id);
    }

    fn stamp(&self, mut event: Event) -> Event {
        event.seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        event
    }

    /// Non-blocking publish: delivers to every matching subscriber via
    /// `try_send`; a full queue drops the event for that subscriber only.
    pub async fn publish(&self, event: Event) {
        let event = self.stamp(event);
        let guard = self.inner.read().await;
        for sub in guard.subscribers.values() {
            if !sub.filter.matches(&event) {
                continue;
            }
            if sub.sender.try_send(event.clone()).is_err() {
                sub.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(event = %event.kind, "subscriber queue full, dropping event");
            }
        }
    }

    /// Blocking publish: awaits every matching subscriber's enqueue before
    /// returning, guaranteeing this event is observable before the caller
    /// proceeds to whatever happens next.
    pub async fn publish_sync(&self, event: Event) {
        let event = self.stamp(event);
        let guard = self.inner.read().await;
        for sub in guard.subscribers.values() {
            if !sub.filter.matches(&event) {
                continue;
            }
            let _ = sub.sender.send(event.clone()).await;
        }
    }

    /// Drop all subscribers and reset the sequence counter. Exposed for tests.
    pub async fn reset(&self) {
        let mut guard = self.inner.write().await;
        guard.subscribers.clear();
        guard.next_id = 0;
        self.seq.store(0, Ordering::Relaxed);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.read().await.subscribers.len()
    }
}
