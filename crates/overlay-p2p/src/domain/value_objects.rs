//! Value objects shared by the routing, discovery and gossip layers.

use libp2p::kad::RecordKey;
use libp2p::{Multiaddr, PeerId};
use sha2::{Digest, Sha256};

/// Protocol identifier announced by this node.
pub const PROTOCOL: &str = "/overlay/0.0.2";

/// A peer found through discovery, with whatever addresses are known for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    /// May be empty; the swarm can still resolve addresses through the routing table.
    pub addrs: Vec<Multiaddr>,
}

impl PeerInfo {
    pub fn new(peer_id: PeerId, addrs: Vec<Multiaddr>) -> Self {
        Self { peer_id, addrs }
    }
}

/// Provider-record key for a discovery namespace (SHA-256 of the name).
pub fn namespace_key(namespace: &str) -> RecordKey {
    let digest = Sha256::digest(namespace.as_bytes());
    RecordKey::new(&digest.to_vec())
}

/// Split a `/p2p/<peer id>`-terminated address into peer id and address.
pub fn split_peer_addr(addr: &Multiaddr) -> Option<(PeerId, Multiaddr)> {
    let peer_id = addr.iter().find_map(|proto| match proto {
        libp2p::multiaddr::Protocol::P2p(peer_id) => Some(peer_id),
        _ => None,
    })?;
    let transport: Multiaddr = addr
        .iter()
        .filter(|p| !matches!(p, libp2p::multiaddr::Protocol::P2p(_)))
        .collect();
    Some((peer_id, transport))
}
