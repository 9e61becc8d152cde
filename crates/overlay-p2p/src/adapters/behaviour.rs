//! Composite network behaviour of the host.

use libp2p::identity::Keypair;
use libp2p::kad::store::MemoryStore;
use libp2p::swarm::behaviour::toggle::Toggle;
use libp2p::swarm::NetworkBehaviour;
use libp2p::{autonat, gossipsub, identify, kad, relay, upnp};

use crate::config::NatSection;
use crate::domain::PROTOCOL;

/// Everything the swarm runs.
///
/// Routing and pub/sub are optional: routing is absent on a degraded node,
/// and pub/sub is installed after the rest of the host is built. The relay
/// client is present when `auto_relay` is set.
#[derive(NetworkBehaviour)]
pub struct OverlayBehaviour {
    pub kademlia: Toggle<kad::Behaviour<MemoryStore>>,
    pub gossipsub: Toggle<gossipsub::Behaviour>,
    pub identify: identify::Behaviour,
    pub autonat: autonat::Behaviour,
    pub upnp: Toggle<upnp::tokio::Behaviour>,
    pub relay: Toggle<relay::Behaviour>,
    pub relay_client: Toggle<relay::client::Behaviour>,
}

impl OverlayBehaviour {
    pub fn new(
        key: &Keypair,
        kademlia: Option<kad::Behaviour<MemoryStore>>,
        relay_client: relay::client::Behaviour,
        nat: &NatSection,
    ) -> Self {
        let peer_id = key.public().to_peer_id();

        let identify = identify::Behaviour::new(
            identify::Config::new(PROTOCOL.to_string(), key.public())
                .with_agent_version(format!("overlay/{}", env!("CARGO_PKG_VERSION"))),
        );

        Self {
            kademlia: Toggle::from(kademlia),
            gossipsub: Toggle::from(None),
            identify,
            autonat: autonat::Behaviour::new(peer_id, autonat::Config::default()),
            upnp: Toggle::from(nat.port_map.then(upnp::tokio::Behaviour::default)),
            relay: Toggle::from(
                nat.relay_service
                    .then(|| relay::Behaviour::new(peer_id, relay::Config::default())),
            ),
            relay_client: Toggle::from(nat.auto_relay.then_some(relay_client)),
        }
    }
}
