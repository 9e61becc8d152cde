//! Transport assembly.
//!
//! Builds the swarm (TCP with Noise and Yamux, QUIC v1, circuit relay
//! client), composes the
//! behaviour around the routing capability produced by the injected
//! [`PeerRouterFactory`], and opens the four listeners.

use libp2p::{noise, tcp, yamux, SwarmBuilder};
use tracing::{info, warn};

use super::behaviour::OverlayBehaviour;
use super::host::{HostHandle, PendingHost};
use crate::config::NodeConfig;
use crate::domain::{ConnectionPolicy, NodeError, NodeIdentity};
use crate::ports::{EarlyHost, PeerRouterFactory};

/// Result of a successful assembly.
pub struct Assembled {
    pub host: PendingHost,
    /// Set when the router factory failed and degraded routing is allowed.
    pub routing_error: Option<NodeError>,
}

pub struct TransportAssembler<'a> {
    config: &'a NodeConfig,
}

impl<'a> TransportAssembler<'a> {
    pub fn new(config: &'a NodeConfig) -> Self {
        Self { config }
    }

    /// Build the host and open its listeners.
    ///
    /// The factory is invoked exactly once, while the behaviour is being
    /// composed. A factory failure aborts before any listener is opened
    /// unless `allow_degraded_routing` is set, in which case the host is
    /// built without routing and the error is handed back.
    ///
    /// On a bind failure every listener opened so far is closed before the
    /// error is returned.
    pub fn assemble(
        &self,
        identity: &NodeIdentity,
        policy: ConnectionPolicy,
        factory: &dyn PeerRouterFactory,
    ) -> Result<Assembled, NodeError> {
        let config = self.config;
        let (handle, commands) = HostHandle::channel(identity.peer_id());
        let mut routing_error = None;

        let mut swarm = SwarmBuilder::with_existing_identity(identity.keypair().clone())
            .with_tokio()
            .with_tcp(
                tcp::Config::default().nodelay(true),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(|e| NodeError::TransportInit(e.to_string()))?
            .with_quic()
            .with_relay_client(noise::Config::new, yamux::Config::default)
            .map_err(|e| NodeError::TransportInit(e.to_string()))?
            .with_behaviour(
                |key,
                 relay_client|
                 -> Result<OverlayBehaviour, Box<dyn std::error::Error + Send + Sync>> {
                    let early = EarlyHost::new(key, &handle);
                    let kademlia = match factory.build(&early) {
                        Ok(capability) => Some(capability.into_behaviour()),
                        Err(e) => {
                            routing_error = Some(e);
                            None
                        }
                    };
                    Ok(OverlayBehaviour::new(
                        key,
                        kademlia,
                        relay_client,
                        &config.nat,
                    ))
                },
            )
            .map_err(|e| NodeError::TransportInit(e.to_string()))?
            .with_swarm_config(|c| c.with_idle_connection_timeout(config.idle_connection_timeout()))
            .build();

        if let Some(e) = &routing_error {
            if !config.routing.allow_degraded_routing {
                return Err(e.clone());
            }
            warn!(error = %e, "Continuing without routing table");
        }

        let addresses = config.listen_addresses();
        let mut listeners = Vec::with_capacity(addresses.len());
        for addr in addresses.iter() {
            match swarm.listen_on(addr.clone()) {
                Ok(id) => listeners.push(id),
                Err(e) => {
                    for id in listeners {
                        swarm.remove_listener(id);
                    }
                    return Err(NodeError::TransportBindFailed {
                        address: addr.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            peer = %identity.peer_id(),
            port = addresses.port(),
            routing = routing_error.is_none(),
            "Transport assembled"
        );

        let host = PendingHost::new(
            swarm,
            handle,
            commands,
            listeners,
            addresses,
            policy,
            config.prune_interval(),
        );
        Ok(Assembled {
            host,
            routing_error,
        })
    }
}
