//! Driven ports: what the transport assembler needs from a routing
//! implementation while the host is still being built.
//!
//! The routing table needs a host to run on, and the host needs the routing
//! behaviour to finish construction. The assembler breaks the cycle by
//! handing the factory an [`EarlyHost`]: the local identity plus a command
//! handle whose queue is live before the swarm exists. Commands sent through
//! it are served once the host starts.

use libp2p::identity::Keypair;
use libp2p::kad;
use libp2p::PeerId;
use std::sync::Arc;

use crate::adapters::host::HostHandle;
use crate::adapters::routing::RoutingTable;
use crate::domain::{NodeError, PROTOCOL};

/// Partially constructed host visible to a [`PeerRouterFactory`].
pub struct EarlyHost<'a> {
    keypair: &'a Keypair,
    peer_id: PeerId,
    handle: &'a HostHandle,
}

impl<'a> EarlyHost<'a> {
    pub(crate) fn new(keypair: &'a Keypair, handle: &'a HostHandle) -> Self {
        Self {
            keypair,
            peer_id: keypair.public().to_peer_id(),
            handle,
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn keypair(&self) -> &Keypair {
        self.keypair
    }

    /// Command handle of the host under construction.
    pub fn handle(&self) -> &HostHandle {
        self.handle
    }

    pub fn protocol(&self) -> &'static str {
        PROTOCOL
    }
}

/// Routing behaviour handed back to the assembler.
pub struct RouterCapability {
    behaviour: kad::Behaviour<kad::store::MemoryStore>,
}

impl RouterCapability {
    pub fn new(behaviour: kad::Behaviour<kad::store::MemoryStore>) -> Self {
        Self { behaviour }
    }

    pub(crate) fn into_behaviour(self) -> kad::Behaviour<kad::store::MemoryStore> {
        self.behaviour
    }
}

/// Builds the routing capability for a host under construction.
///
/// `build` is invoked exactly once, from inside host construction. As a side
/// effect the factory keeps the routing table it created, retrievable with
/// [`routing_table`](Self::routing_table) once construction returns.
pub trait PeerRouterFactory: Send + Sync {
    fn build(&self, host: &EarlyHost<'_>) -> Result<RouterCapability, NodeError>;

    /// The table created by the last successful `build`.
    fn routing_table(&self) -> Option<Arc<RoutingTable>>;
}
