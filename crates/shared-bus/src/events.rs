//! # Network Events
//!
//! Defines all event types that flow through the shared bus.

use libp2p::{Multiaddr, PeerId};
use std::fmt;

/// Whether this node is believed to be dialable from the public internet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Reachability {
    /// No verdict yet.
    #[default]
    Unknown,
    /// Remote probes reached us on a public address.
    Public,
    /// Remote probes failed; we sit behind NAT or a firewall.
    Private,
}

impl fmt::Display for Reachability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Public => write!(f, "public"),
            Self::Private => write!(f, "private"),
        }
    }
}

/// All events that can be published to the event bus.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    // =========================================================================
    // REACHABILITY
    // =========================================================================
    /// AutoNAT changed its verdict about this node.
    ReachabilityChanged {
        old: Reachability,
        new: Reachability,
    },

    // =========================================================================
    // CONNECTIONS
    // =========================================================================
    /// First connection to a peer was established.
    PeerConnected(PeerId),

    /// Last connection to a peer was closed.
    PeerDisconnected(PeerId),

    /// The connection manager closed a peer to get back under its watermark.
    ConnectionPruned(PeerId),

    // =========================================================================
    // ADDRESSES
    // =========================================================================
    /// A listener started accepting on this address.
    ListenAddrAdded(Multiaddr),

    /// An external address was confirmed (port mapping or probe).
    ExternalAddrConfirmed(Multiaddr),

    // =========================================================================
    // PUB/SUB
    // =========================================================================
    /// A gossip message was delivered on a subscribed topic.
    GossipMessage {
        topic: String,
        source: Option<PeerId>,
        data: Vec<u8>,
    },
}

impl NetworkEvent {
    /// Get the topic for this event.
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::ReachabilityChanged { .. } => EventTopic::Reachability,
            Self::PeerConnected(_) | Self::PeerDisconnected(_) | Self::ConnectionPruned(_) => {
                EventTopic::Connections
            }
            Self::ListenAddrAdded(_) | Self::ExternalAddrConfirmed(_) => EventTopic::Addresses,
            Self::GossipMessage { .. } => EventTopic::PubSub,
        }
    }

    /// Get the component that emits this event.
    #[must_use]
    pub fn source(&self) -> EventSource {
        match self {
            Self::ReachabilityChanged { .. } => EventSource::AutoNat,
            Self::ConnectionPruned(_) => EventSource::ConnectionManager,
            Self::PeerConnected(_)
            | Self::PeerDisconnected(_)
            | Self::ListenAddrAdded(_)
            | Self::ExternalAddrConfirmed(_) => EventSource::Transport,
            Self::GossipMessage { .. } => EventSource::PubSub,
        }
    }
}

/// Event topics for filtering subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    /// Reachability transitions.
    Reachability,
    /// Connection lifecycle.
    Connections,
    /// Listen and external addresses.
    Addresses,
    /// Gossip deliveries.
    PubSub,
    /// All events (wildcard).
    All,
}

/// Component that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSource {
    Transport,
    AutoNat,
    ConnectionManager,
    PubSub,
}

/// Filter for subscribing to specific events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Topics to include. Empty means all topics.
    pub topics: Vec<EventTopic>,
    /// Sources to include. Empty means all sources.
    pub sources: Vec<EventSource>,
}

impl EventFilter {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for specific topics.
    #[must_use]
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self {
            topics,
            sources: Vec::new(),
        }
    }

    /// Create a filter for events from specific components.
    #[must_use]
    pub fn from_sources(sources: Vec<EventSource>) -> Self {
        Self {
            topics: Vec::new(),
            sources,
        }
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &NetworkEvent) -> bool {
        let topic_match = self.topics.is_empty()
            || self.topics.contains(&EventTopic::All)
            || self.topics.contains(&event.topic());

        let source_match = self.sources.is_empty() || self.sources.contains(&event.source());

        topic_match && source_match
    }
}
