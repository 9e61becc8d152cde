//! # Event Publisher
//!
//! Defines the publishing side of the event bus.

use crate::events::{EventFilter, NetworkEvent};
use crate::subscriber::{EventStream, Subscription, SubscriptionError};
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Trait for publishing events to the bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event to the bus.
    ///
    /// # Returns
    ///
    /// The number of active subscribers that received the event.
    async fn publish(&self, event: NetworkEvent) -> usize;

    /// Get the total number of events published.
    fn events_published(&self) -> u64;
}

/// In-memory implementation of the event bus.
///
/// Uses `tokio::sync::broadcast` for multi-producer, multi-consumer semantics.
/// The sender lives behind a lock so that [`close`](Self::close) can drop it,
/// which ends every receiver.
pub struct InMemoryEventBus {
    /// Broadcast sender for events. `None` once closed.
    sender: RwLock<Option<broadcast::Sender<NetworkEvent>>>,

    /// Active subscription count by topic.
    subscriptions: Arc<RwLock<HashMap<String, usize>>>,

    /// Total events published.
    events_published: AtomicU64,

    /// Channel capacity.
    capacity: usize,
}

impl InMemoryEventBus {
    /// Create a new in-memory event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new in-memory event bus with specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: RwLock::new(Some(sender)),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            events_published: AtomicU64::new(0),
            capacity,
        }
    }

    /// Subscribe to events matching a filter.
    ///
    /// Fails with [`SubscriptionError::Closed`] once the bus was closed.
    pub fn try_subscribe(&self, filter: EventFilter) -> Result<Subscription, SubscriptionError> {
        let receiver = {
            let guard = self.sender.read().map_err(|_| SubscriptionError::Closed)?;
            guard
                .as_ref()
                .ok_or(SubscriptionError::Closed)?
                .subscribe()
        };
        let topic_key = format!("{:?}", filter.topics);

        // Track subscription
        {
            if let Ok(mut subs) = self.subscriptions.write() {
                *subs.entry(topic_key.clone()).or_insert(0) += 1;
            }
        }

        debug!(topics = ?filter.topics, "New subscription created");

        Ok(Subscription::new(
            receiver,
            filter,
            self.subscriptions.clone(),
            topic_key,
        ))
    }

    /// Get a stream of events matching a filter.
    pub fn event_stream(&self, filter: EventFilter) -> Result<EventStream, SubscriptionError> {
        self.try_subscribe(filter).map(EventStream::new)
    }

    /// Close the bus. Open subscriptions drain what is buffered and then end.
    pub fn close(&self) {
        if let Ok(mut guard) = self.sender.write() {
            if guard.take().is_some() {
                debug!("Event bus closed");
            }
        }
    }

    /// Whether [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.read().map(|g| g.is_none()).unwrap_or(true)
    }

    /// Get the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender
            .read()
            .ok()
            .and_then(|g| g.as_ref().map(broadcast::Sender::receiver_count))
            .unwrap_or(0)
    }

    /// Get the number of live subscriptions for an exact topic list.
    #[must_use]
    pub fn subscriptions_for(&self, filter: &EventFilter) -> usize {
        let key = format!("{:?}", filter.topics);
        self.subscriptions
            .read()
            .ok()
            .and_then(|subs| subs.get(&key).copied())
            .unwrap_or(0)
    }

    /// Get the channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Synchronous publish used by code that is not in an async context.
    pub fn emit(&self, event: NetworkEvent) -> usize {
        let topic = event.topic();
        let source = event.source();

        // Always increment counter (event was attempted)
        self.events_published.fetch_add(1, Ordering::Relaxed);

        let Ok(guard) = self.sender.read() else {
            return 0;
        };
        let Some(sender) = guard.as_ref() else {
            debug!(topic = ?topic, "Event dropped (bus closed)");
            return 0;
        };

        match sender.send(event) {
            Ok(receiver_count) => {
                debug!(
                    topic = ?topic,
                    source = ?source,
                    receivers = receiver_count,
                    "Event published"
                );
                receiver_count
            }
            Err(e) => {
                // No receivers - event is dropped
                warn!(
                    topic = ?topic,
                    source = ?source,
                    error = %e,
                    "Event dropped (no receivers)"
                );
                0
            }
        }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, event: NetworkEvent) -> usize {
        self.emit(event)
    }

    fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }
}
