//! Adapters Layer - libp2p-backed implementations
//!
//! - `behaviour`: composite network behaviour
//! - `transport`: swarm construction and listeners
//! - `host` / `driver`: host handle, lifecycle and the task that polls the swarm
//! - `routing`: Kademlia router factory and routing table handle
//! - `reachability`: reachability subscriptions
//! - `relay`: relay reservations while privately reachable
//! - `discovery`: namespace discovery over the routing table
//! - `gossip`: gossip engine and topic router

pub mod behaviour;
mod driver;
pub mod discovery;
pub mod gossip;
pub mod host;
pub mod reachability;
mod relay;
pub mod routing;
pub mod transport;

pub use behaviour::OverlayBehaviour;
pub use discovery::RoutingDiscovery;
pub use gossip::{GossipRouter, PubSubBuilder};
pub use host::{HostCommand, HostHandle, PendingHost, PubSubCommand, RoutingCommand, RunningHost};
pub use reachability::{ReachabilityChange, ReachabilityMonitor, ReachabilitySubscription};
pub use routing::{
    parse_bootstrap_peers, KademliaRouterFactory, RoutingTable, DEFAULT_BOOTSTRAP_PEERS,
    PROVIDER_RECORD_TTL,
};
pub use transport::{Assembled, TransportAssembler};
