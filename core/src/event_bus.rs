//! In-process publish/subscribe event bus (spec §4.2).
//!
//! The teacher crate's `EventBus` trait targets an at-least-once,
//! eventually-delivered Kafka-compatible bus because it coordinates sagas
//! across a distributed deployment. This system is explicitly single-site
//! and synchronous: "Single-process topic-keyed publish/subscribe with
//! synchronous fan-out to registered subscribers." The trait below keeps the
//! teacher's topic-keyed publish/subscribe shape but drops the async
//! transport plumbing that doesn't apply in-process.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value;

/// A domain event fanned out to every subscriber of its topic.
#[derive(Clone, Debug)]
pub struct DomainEvent {
    /// Topic name, conventionally `"{aggregate}-events"` (e.g. `"queue-events"`).
    pub topic: String,
    /// Entity type the event concerns (e.g. `"queue_entry"`, `"reservation"`).
    pub entity_type: String,
    /// Identifier of the affected entity.
    pub entity_id: String,
    /// What happened to the entity: `CREATE`, `UPDATE`, or `DELETE`, matching
    /// the sync message `type` field these events are bridged into.
    pub action: String,
    /// Event-specific payload.
    pub payload: Value,
    /// When the event was published.
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    /// Construct an event stamped with the current time.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        action: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            topic: topic.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            action: action.into(),
            payload,
            occurred_at: Utc::now(),
        }
    }
}

/// A registered subscriber callback.
pub type Subscriber = Arc<dyn Fn(&DomainEvent) + Send + Sync>;

/// Opaque handle identifying a registered subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Topic-keyed publish/subscribe bus.
///
/// Ordering: per-topic FIFO among messages published from the same producer
/// thread (guaranteed here because `publish` dispatches synchronously and
/// holds the subscriber list for the duration of the call). Failures in a
/// subscriber must not prevent other subscribers from receiving the event;
/// a panicking subscriber is caught and logged rather than aborting delivery
/// to the rest.
pub trait EventBus: Send + Sync {
    /// Publish `event` to its topic, invoking every registered subscriber in
    /// registration order.
    fn publish(&self, event: DomainEvent);

    /// Register a subscriber for `topic`. Returns a subscription id that can
    /// be used to unsubscribe.
    fn subscribe(&self, topic: &str, subscriber: Subscriber) -> SubscriptionId;

    /// Remove a previously registered subscriber.
    fn unsubscribe(&self, topic: &str, id: SubscriptionId);
}

/// In-process [`EventBus`] implementation.
#[derive(Default)]
pub struct InMemoryEventBus {
    subscribers: RwLock<std::collections::HashMap<String, Vec<(SubscriptionId, Subscriber)>>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl InMemoryEventBus {
    /// Create a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, event: DomainEvent) {
        let subscribers = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        let Some(topic_subscribers) = subscribers.get(&event.topic) else {
            return;
        };
        for (_, subscriber) in topic_subscribers {
            if catch_unwind(AssertUnwindSafe(|| subscriber(&event))).is_err() {
                tracing::error!(
                    topic = %event.topic,
                    entity_id = %event.entity_id,
                    "event subscriber panicked; continuing fan-out"
                );
            }
        }
    }

    fn subscribe(&self, topic: &str, subscriber: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(
            self.next_id
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed),
        );
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subscribers
            .entry(topic.to_string())
            .or_default()
            .push((id, subscriber));
        id
    }

    fn unsubscribe(&self, topic: &str, id: SubscriptionId) {
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = subscribers.get_mut(topic) {
            list.retain(|(sub_id, _)| *sub_id != id);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn delivers_in_fifo_order_to_all_subscribers() {
        let bus = InMemoryEventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            bus.subscribe(
                "queue-events",
                Arc::new(move |_event: &DomainEvent| {
                    order.lock().unwrap().push(label);
                }),
            );
        }

        bus.publish(DomainEvent::new("queue-events", "queue_entry", "1", "CREATE", Value::Null));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn a_panicking_subscriber_does_not_block_the_others() {
        let bus = InMemoryEventBus::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        bus.subscribe("t", Arc::new(|_: &DomainEvent| panic!("boom")));
        {
            let delivered = Arc::clone(&delivered);
            bus.subscribe(
                "t",
                Arc::new(move |_: &DomainEvent| {
                    delivered.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        bus.publish(DomainEvent::new("t", "x", "1", "UPDATE", Value::Null));
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribed_callbacks_stop_receiving_events() {
        let bus = InMemoryEventBus::new();
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        let id = bus.subscribe(
            "t",
            Arc::new(move |_: &DomainEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        bus.publish(DomainEvent::new("t", "x", "1", "UPDATE", Value::Null));
        bus.unsubscribe("t", id);
        bus.publish(DomainEvent::new("t", "x", "2", "UPDATE", Value::Null));

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }
}
