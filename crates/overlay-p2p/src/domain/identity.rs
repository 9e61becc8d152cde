//! Node identity derived from a serialized private key.

use libp2p::identity::Keypair;
use libp2p::PeerId;

use super::errors::NodeError;

/// Cryptographic identity of the local node.
///
/// The peer id is derived from the public half of the key and never changes
/// for the lifetime of the node.
#[derive(Clone)]
pub struct NodeIdentity {
    keypair: Keypair,
    peer_id: PeerId,
}

impl NodeIdentity {
    /// Decode a protobuf-encoded private key.
    ///
    /// Pure: no I/O and no state besides the returned value.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, NodeError> {
        let keypair = Keypair::from_protobuf_encoding(bytes)
            .map_err(|e| NodeError::InvalidKeyEncoding(e.to_string()))?;
        Ok(Self::from_keypair(keypair))
    }

    /// Generate a fresh Ed25519 identity.
    pub fn generate() -> Self {
        Self::from_keypair(Keypair::generate_ed25519())
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        let peer_id = keypair.public().to_peer_id();
        Self { keypair, peer_id }
    }

    /// Encode the private key in the same format [`from_bytes`](Self::from_bytes) accepts.
    pub fn to_bytes(&self) -> Result<Vec<u8>, NodeError> {
        self.keypair
            .to_protobuf_encoding()
            .map_err(|e| NodeError::InvalidKeyEncoding(e.to_string()))
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

impl std::fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material
        f.debug_struct("NodeIdentity")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}
