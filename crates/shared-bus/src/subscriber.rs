//! # Event Subscriber
//!
//! Defines the subscription side of the event bus.

use crate::events::{EventFilter, NetworkEvent};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tracing::debug;

/// Errors from subscription operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The event bus was closed, or the subscription was released.
    #[error("Event bus closed")]
    Closed,
}

/// Trait for components that hand out subscriptions.
pub trait EventSubscriber: Send + Sync {
    /// Subscribe to events matching a filter.
    fn subscribe(&self, filter: EventFilter) -> Result<Subscription, SubscriptionError>;
}

impl EventSubscriber for crate::publisher::InMemoryEventBus {
    fn subscribe(&self, filter: EventFilter) -> Result<Subscription, SubscriptionError> {
        self.try_subscribe(filter)
    }
}

/// A subscription handle for receiving events.
///
/// Released explicitly with [`close`](Self::close) or implicitly on drop.
pub struct Subscription {
    /// The broadcast receiver. `None` once released.
    receiver: Option<broadcast::Receiver<NetworkEvent>>,

    /// Filter for this subscription.
    filter: EventFilter,

    /// Reference to subscription tracking (for cleanup).
    subscriptions: Arc<RwLock<HashMap<String, usize>>>,

    /// Topic key for this subscription.
    topic_key: String,

    released: bool,
}

impl Subscription {
    /// Create a new subscription.
    pub(crate) fn new(
        receiver: broadcast::Receiver<NetworkEvent>,
        filter: EventFilter,
        subscriptions: Arc<RwLock<HashMap<String, usize>>>,
        topic_key: String,
    ) -> Self {
        Self {
            receiver: Some(receiver),
            filter,
            subscriptions,
            topic_key,
            released: false,
        }
    }

    /// Receive the next event that matches the filter.
    ///
    /// # Returns
    ///
    /// - `Some(event)` - The next matching event
    /// - `None` - The bus was closed or this subscription was released
    pub async fn recv(&mut self) -> Option<NetworkEvent> {
        let receiver = self.receiver.as_mut()?;
        loop {
            let event = match receiver.recv().await {
                Ok(e) => e,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    debug!(lagged = count, "Subscriber lagged, some events dropped");
                    continue;
                }
            };

            if self.filter.matches(&event) {
                return Some(event);
            }
        }
    }

    /// Try to receive the next event without blocking.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(event))` - An event was available and matched
    /// - `Ok(None)` - No event available (would block)
    /// - `Err(SubscriptionError::Closed)` - The bus was closed or the
    ///   subscription released
    pub fn try_recv(&mut self) -> Result<Option<NetworkEvent>, SubscriptionError> {
        let receiver = self.receiver.as_mut().ok_or(SubscriptionError::Closed)?;
        loop {
            let event = match receiver.try_recv() {
                Ok(e) => e,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(SubscriptionError::Closed)
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            };

            if self.filter.matches(&event) {
                return Ok(Some(event));
            }
        }
    }

    /// Release the subscription. Idempotent.
    pub fn close(&mut self) {
        self.receiver = None;
        self.release();
    }

    /// Whether [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.released
    }

    /// Get the filter for this subscription.
    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let Ok(mut subs) = self.subscriptions.write() else {
            return;
        };
        let Some(count) = subs.get_mut(&self.topic_key) else {
            debug!(topic = %self.topic_key, "Subscription released");
            return;
        };

        *count = count.saturating_sub(1);
        if *count == 0 {
            subs.remove(&self.topic_key);
        }
        debug!(topic = %self.topic_key, "Subscription released");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// A stream wrapper for subscriptions.
///
/// Implements `tokio_stream::Stream` for use with stream combinators.
pub struct EventStream {
    inner: Option<BroadcastStream<NetworkEvent>>,
    subscription: Subscription,
}

impl EventStream {
    /// Create a new event stream from a subscription.
    #[must_use]
    pub fn new(mut subscription: Subscription) -> Self {
        let inner = subscription.receiver.take().map(BroadcastStream::new);
        Self {
            inner,
            subscription,
        }
    }

    /// Get the filter for this stream.
    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        self.subscription.filter()
    }
}

impl Stream for EventStream {
    type Item = NetworkEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };
        loop {
            match Pin::new(&mut *inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if this.subscription.filter.matches(&event) {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(count)))) => {
                    debug!(lagged = count, "Event stream lagged, some events dropped");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventTopic, Reachability};
    use crate::publisher::InMemoryEventBus;
    use crate::EventPublisher;
    use futures::StreamExt;
    use libp2p::PeerId;
    use std::time::Duration;
    use tokio::time::timeout;

    fn reachability(new: Reachability) -> NetworkEvent {
        NetworkEvent::ReachabilityChanged {
            old: Reachability::Unknown,
            new,
        }
    }

    #[tokio::test]
    async fn test_subscription_recv() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.try_subscribe(EventFilter::all()).unwrap();

        bus.publish(reachability(Reachability::Public)).await;

        let received = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timeout")
            .expect("event");

        assert_eq!(received, reachability(Reachability::Public));
    }

    #[tokio::test]
    async fn test_subscription_filter() {
        let bus = InMemoryEventBus::new();

        let mut sub = bus
            .try_subscribe(EventFilter::topics(vec![EventTopic::Reachability]))
            .unwrap();

        // Connection event should be filtered
        bus.publish(NetworkEvent::PeerConnected(PeerId::random()))
            .await;
        bus.publish(reachability(Reachability::Private)).await;

        let received = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timeout")
            .expect("event");

        assert!(matches!(
            received,
            NetworkEvent::ReachabilityChanged {
                new: Reachability::Private,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_subscription_drop_cleanup() {
        let bus = InMemoryEventBus::new();

        {
            let _sub1 = bus.try_subscribe(EventFilter::all()).unwrap();
            let _sub2 = bus.try_subscribe(EventFilter::all()).unwrap();
            assert_eq!(bus.subscriber_count(), 2);
        }

        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.subscriptions_for(&EventFilter::all()), 0);
    }

    #[tokio::test]
    async fn test_explicit_close_releases_once() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.try_subscribe(EventFilter::all()).unwrap();
        let _other = bus.try_subscribe(EventFilter::all()).unwrap();

        sub.close();
        sub.close();

        assert!(sub.is_closed());
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.subscriptions_for(&EventFilter::all()), 1);
        assert_eq!(sub.try_recv(), Err(SubscriptionError::Closed));
        assert!(sub.recv().await.is_none());

        drop(sub);
        assert_eq!(bus.subscriptions_for(&EventFilter::all()), 1);
    }

    #[tokio::test]
    async fn test_bus_close_ends_subscription() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.try_subscribe(EventFilter::all()).unwrap();

        bus.publish(reachability(Reachability::Public)).await;
        bus.close();

        // Buffered event still delivered, then the end of the channel.
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_try_recv_empty() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.try_subscribe(EventFilter::all()).unwrap();

        assert!(matches!(sub.try_recv(), Ok(None)));
    }

    #[tokio::test]
    async fn test_try_recv_event() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.try_subscribe(EventFilter::all()).unwrap();

        bus.publish(reachability(Reachability::Public)).await;

        assert!(matches!(
            sub.try_recv(),
            Ok(Some(NetworkEvent::ReachabilityChanged { .. }))
        ));
    }

    #[tokio::test]
    async fn test_lagged_subscriber_skips_oldest() {
        let bus = InMemoryEventBus::with_capacity(2);
        let mut sub = bus.try_subscribe(EventFilter::all()).unwrap();

        for _ in 0..5 {
            bus.publish(NetworkEvent::PeerConnected(PeerId::random()))
                .await;
        }

        let mut received = 0;
        while let Ok(Some(_)) = sub.try_recv() {
            received += 1;
        }
        assert_eq!(received, 2);
    }

    #[tokio::test]
    async fn test_event_stream_filters() {
        let bus = InMemoryEventBus::new();
        let filter = EventFilter::topics(vec![EventTopic::Reachability]);
        let mut stream = bus.event_stream(filter).unwrap();

        assert_eq!(EventStream::filter(&stream).topics, vec![EventTopic::Reachability]);

        bus.publish(NetworkEvent::PeerConnected(PeerId::random()))
            .await;
        bus.publish(reachability(Reachability::Public)).await;

        let next = timeout(Duration::from_millis(100), stream.next())
            .await
            .expect("timeout")
            .expect("event");
        assert_eq!(next, reachability(Reachability::Public));
    }
}
