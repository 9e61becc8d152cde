//! # Overlay Node Bootstrap
//!
//! This crate brings up a single participant of a peer-to-peer overlay
//! network: it decodes the node identity, opens four listeners (QUIC v1 and
//! TCP over IPv4 and IPv6), builds the Kademlia routing table, monitors
//! reachability, and runs gossip pub/sub with rendezvous-style discovery
//! over the routing table.
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture with:
//! - **Domain Layer:** Identity, listen addresses, connection policy, errors
//! - **Ports Layer:** Router factory and discovery traits
//! - **Adapters Layer:** libp2p transports, swarm driver, routing, gossip
//! - **Service Layer:** The [`Node`] orchestrator
//!
//! ## Circular Dependency
//!
//! The routing table needs the host (to send queries), and the host needs the
//! routing capability (to compose its behaviour). [`HostHandle`] breaks the
//! cycle: its command queue exists before the swarm, so the
//! [`PeerRouterFactory`] can bind the table to the host while the host is
//! still being assembled.
//!
//! ## Example
//!
//! ```rust,no_run
//! use overlay_p2p::{Node, NodeConfig, NodeIdentity};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let key = NodeIdentity::generate().to_bytes()?;
//! let mut node = Node::create(&key, NodeConfig::default())?;
//!
//! if let Some(pubsub) = node.pubsub() {
//!     pubsub.join("chat").await?;
//!     pubsub.publish("chat", b"hello".to_vec()).await?;
//! }
//!
//! node.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// =============================================================================
// CORE MODULES
// =============================================================================

pub mod config;
pub mod domain;
pub mod ports;

// =============================================================================
// LIBP2P ADAPTERS
// =============================================================================

pub mod adapters;

// =============================================================================
// ORCHESTRATION
// =============================================================================

pub mod service;

// =============================================================================
// RE-EXPORTS
// =============================================================================

// Configuration
pub use config::{
    ConfigError, ConnectionSection, GossipSection, NatSection, NodeConfig, RoutingMode,
    RoutingSection,
};

// Domain
pub use domain::{
    namespace_key, AddressFamily, ConnectionManager, ConnectionPolicy, ConnectionStats,
    ListenAddress, ListenAddressSet, NodeError, NodeIdentity, PeerInfo, Reachability, Step,
    TransportKind, PROTOCOL,
};

// Ports
pub use ports::{DiscoveryApi, EarlyHost, PeerRouterFactory, PeerStream, RouterCapability};

// Adapters
pub use adapters::{
    GossipRouter, HostHandle, KademliaRouterFactory, ReachabilityChange, ReachabilityMonitor,
    ReachabilitySubscription, RoutingDiscovery, RoutingTable, DEFAULT_BOOTSTRAP_PEERS,
    PROVIDER_RECORD_TTL,
};

// Service
pub use service::{Node, NodeBuilder, ShutdownStage};
