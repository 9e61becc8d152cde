//! Ports Layer - Trait definitions at the seams of the node
//!
//! - `inbound`: what the node offers to applications (discovery)
//! - `outbound`: what the node needs from a routing implementation

pub mod inbound;
pub mod outbound;

pub use inbound::{DiscoveryApi, PeerStream};
pub use outbound::{EarlyHost, PeerRouterFactory, RouterCapability};
