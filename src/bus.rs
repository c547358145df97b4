//! In-process publish/subscribe bus.
//!
//! Topics are plain strings. A broadcast reaches every current subscriber of
//! the topic except the sender, which is how session actors relay frames to
//! each other without echoing them back to themselves.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::session::protocol::SessionRequest;

// ============================================================================
// Payloads
// ============================================================================

/// What travels over the bus.
#[derive(Clone)]
pub enum BusPayload {
    /// A correlated transport request addressed to a session's private topic.
    Request(SessionRequest),
    /// A pre-serialized relay frame fanned out to a room or a private topic.
    Frame(String),
}

/// Identifies one subscription on one topic.
pub type SubscriberId = u64;

// ============================================================================
// PubSub
// ============================================================================

type TopicMap = DashMap<String, HashMap<SubscriberId, mpsc::UnboundedSender<BusPayload>>>;

struct PubSubInner {
    topics: TopicMap,
    next_id: AtomicU64,
}

/// Shared bus handle. Cheap to clone.
#[derive(Clone)]
pub struct PubSub {
    inner: Arc<PubSubInner>,
}

impl PubSub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PubSubInner {
                topics: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribe with a dedicated receiver. The subscription ends when the
    /// returned guard is dropped.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let guard = self.attach(topic, tx);
        Subscription { guard, rx }
    }

    /// Attach an existing sender to a topic.
    ///
    /// Lets one consumer (a session actor) funnel several topics into a
    /// single inlet channel while keeping a distinct subscriber id per topic.
    pub fn attach(&self, topic: &str, tx: mpsc::UnboundedSender<BusPayload>) -> TopicGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(id, tx);
        TopicGuard {
            id,
            topic: topic.to_string(),
            inner: self.inner.clone(),
        }
    }

    /// Broadcast to every current subscriber of `topic` except `from`.
    ///
    /// Returns the number of subscribers the payload was delivered to.
    pub fn broadcast_from(
        &self,
        topic: &str,
        from: Option<SubscriberId>,
        payload: BusPayload,
    ) -> usize {
        let Some(subscribers) = self.inner.topics.get(topic) else {
            return 0;
        };
        let mut delivered = 0;
        for (id, tx) in subscribers.iter() {
            if Some(*id) == from {
                continue;
            }
            if tx.send(payload.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Number of current subscribers of a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.topics.get(topic).map_or(0, |s| s.len())
    }
}

impl Default for PubSub {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Guards
// ============================================================================

/// Keeps one sender attached to one topic; detaches on drop.
pub struct TopicGuard {
    id: SubscriberId,
    topic: String,
    inner: Arc<PubSubInner>,
}

impl TopicGuard {
    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

impl Drop for TopicGuard {
    fn drop(&mut self) {
        if let Some(mut subscribers) = self.inner.topics.get_mut(&self.topic) {
            subscribers.remove(&self.id);
            if subscribers.is_empty() {
                drop(subscribers);
                self.inner
                    .topics
                    .remove_if(&self.topic, |_, subs| subs.is_empty());
            }
        }
    }
}

/// A subscription with its own receiver.
pub struct Subscription {
    guard: TopicGuard,
    pub rx: mpsc::UnboundedReceiver<BusPayload>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.guard.id()
    }
}

// ============================================================================
// Tests
// ============================================================================
