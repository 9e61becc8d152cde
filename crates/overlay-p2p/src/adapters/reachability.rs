//! Reachability monitor.
//!
//! Reachability transitions are detected by AutoNAT inside the swarm driver
//! and published on the event bus. This adapter hands out explicit
//! subscriptions filtered to those events.

use libp2p::autonat::NatStatus;
use shared_bus::{
    EventFilter, EventTopic, InMemoryEventBus, NetworkEvent, Reachability, Subscription,
    SubscriptionError,
};

use crate::domain::NodeError;

/// One reachability transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReachabilityChange {
    pub old: Reachability,
    pub new: Reachability,
}

pub struct ReachabilityMonitor;

impl ReachabilityMonitor {
    /// Subscribe to reachability transitions.
    ///
    /// Fails only when the bus is closed.
    pub fn subscribe(bus: &InMemoryEventBus) -> Result<ReachabilitySubscription, NodeError> {
        let inner = bus
            .try_subscribe(EventFilter::topics(vec![EventTopic::Reachability]))
            .map_err(|_| NodeError::EventBusUnavailable)?;
        Ok(ReachabilitySubscription { inner })
    }
}

/// Explicit subscription handle. Released by [`close`](Self::close) or on drop.
pub struct ReachabilitySubscription {
    inner: Subscription,
}

impl ReachabilitySubscription {
    /// Next transition, or `None` once closed.
    pub async fn recv(&mut self) -> Option<ReachabilityChange> {
        loop {
            match self.inner.recv().await? {
                NetworkEvent::ReachabilityChanged { old, new } => {
                    return Some(ReachabilityChange { old, new })
                }
                _ => continue,
            }
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Result<Option<ReachabilityChange>, NodeError> {
        loop {
            match self.inner.try_recv() {
                Ok(Some(NetworkEvent::ReachabilityChanged { old, new })) => {
                    return Ok(Some(ReachabilityChange { old, new }))
                }
                Ok(Some(_)) => continue,
                Ok(None) => return Ok(None),
                Err(SubscriptionError::Closed) => return Err(NodeError::EventBusUnavailable),
            }
        }
    }

    /// Unsubscribe. Idempotent.
    pub fn close(&mut self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Last reported reachability, collapsing AutoNAT status updates into
/// transitions.
///
/// AutoNAT reports a new status whenever the confirmed public address
/// changes; only a change of [`Reachability`] is a transition.
#[derive(Debug, Default)]
pub(crate) struct ReachabilityTracker {
    current: Reachability,
}

impl ReachabilityTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn current(&self) -> Reachability {
        self.current
    }

    pub(crate) fn observe(&mut self, status: &NatStatus) -> Option<ReachabilityChange> {
        let new = reachability_from_nat(status);
        if new == self.current {
            return None;
        }
        let old = std::mem::replace(&mut self.current, new);
        Some(ReachabilityChange { old, new })
    }
}

pub(crate) fn reachability_from_nat(status: &NatStatus) -> Reachability {
    match status {
        NatStatus::Public(_) => Reachability::Public,
        NatStatus::Private => Reachability::Private,
        NatStatus::Unknown => Reachability::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_bus::EventPublisher;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_receives_transitions_only() {
        let bus = InMemoryEventBus::new();
        let mut sub = ReachabilityMonitor::subscribe(&bus).unwrap();

        bus.publish(NetworkEvent::PeerConnected(libp2p::PeerId::random()))
            .await;
        bus.publish(NetworkEvent::ReachabilityChanged {
            old: Reachability::Unknown,
            new: Reachability::Private,
        })
        .await;

        let change = timeout(Duration::from_millis(100), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            change,
            ReachabilityChange {
                old: Reachability::Unknown,
                new: Reachability::Private
            }
        );
        assert_eq!(sub.try_recv().unwrap(), None);
    }

    #[test]
    fn test_closed_bus_rejects_subscription() {
        let bus = InMemoryEventBus::new();
        bus.close();
        assert!(matches!(
            ReachabilityMonitor::subscribe(&bus),
            Err(NodeError::EventBusUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_close_releases_subscription() {
        let bus = InMemoryEventBus::new();
        let mut sub = ReachabilityMonitor::subscribe(&bus).unwrap();
        assert_eq!(bus.subscriber_count(), 1);

        sub.close();
        sub.close();
        assert!(sub.is_closed());
        assert_eq!(bus.subscriber_count(), 0);
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn test_nat_status_mapping() {
        let addr = "/ip4/203.0.113.1/tcp/4001".parse().unwrap();
        assert_eq!(reachability_from_nat(&NatStatus::Public(addr)), Reachability::Public);
        assert_eq!(reachability_from_nat(&NatStatus::Private), Reachability::Private);
        assert_eq!(reachability_from_nat(&NatStatus::Unknown), Reachability::Unknown);
    }

    #[test]
    fn test_repeated_status_is_not_a_transition() {
        let mut tracker = ReachabilityTracker::new();
        assert_eq!(tracker.observe(&NatStatus::Unknown), None);

        assert_eq!(
            tracker.observe(&NatStatus::Private),
            Some(ReachabilityChange {
                old: Reachability::Unknown,
                new: Reachability::Private
            })
        );
        assert_eq!(tracker.observe(&NatStatus::Private), None);
        assert_eq!(tracker.current(), Reachability::Private);
    }

    #[test]
    fn test_new_public_address_is_not_a_transition() {
        let mut tracker = ReachabilityTracker::new();
        let first = "/ip4/203.0.113.1/tcp/4001".parse().unwrap();
        let second = "/ip4/203.0.113.2/tcp/4001".parse().unwrap();

        assert!(tracker.observe(&NatStatus::Public(first)).is_some());
        assert_eq!(tracker.observe(&NatStatus::Public(second)), None);
    }

    #[test]
    fn test_every_flip_is_reported_once() {
        let mut tracker = ReachabilityTracker::new();
        let public = || NatStatus::Public("/ip4/203.0.113.1/udp/4001/quic-v1".parse().unwrap());

        let changes: Vec<_> = [
            public(),
            public(),
            NatStatus::Private,
            NatStatus::Private,
            public(),
            NatStatus::Unknown,
        ]
        .iter()
        .filter_map(|status| tracker.observe(status))
        .map(|change| (change.old, change.new))
        .collect();

        assert_eq!(
            changes,
            vec![
                (Reachability::Unknown, Reachability::Public),
                (Reachability::Public, Reachability::Private),
                (Reachability::Private, Reachability::Public),
                (Reachability::Public, Reachability::Unknown),
            ]
        );
    }
}
