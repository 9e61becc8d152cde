//! Kademlia routing table provider.

use libp2p::kad::{self, store::MemoryStore, RecordKey};
use libp2p::{Multiaddr, PeerId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::host::{HostCommand, HostHandle, RoutingCommand};
use crate::config::{NodeConfig, RoutingMode};
use crate::domain::{split_peer_addr, NodeError, PeerInfo};
use crate::ports::{EarlyHost, PeerRouterFactory, RouterCapability};

/// Public bootstrap peers used when none are configured.
pub const DEFAULT_BOOTSTRAP_PEERS: [&str; 2] = [
    "/ip4/104.131.131.82/tcp/4001/p2p/QmaCpDMGvV2BGHeYERUEnRQAwe3N8SzbUtfsmvsqQLuvuJ",
    "/ip4/104.131.131.82/udp/4001/quic-v1/p2p/QmaCpDMGvV2BGHeYERUEnRQAwe3N8SzbUtfsmvsqQLuvuJ",
];

/// How long a provider record stays valid.
pub const PROVIDER_RECORD_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Interval at which local provider records are re-published.
const PROVIDER_PUBLICATION_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

/// Handle to the node's routing table.
///
/// Created exactly once, by [`KademliaRouterFactory::build`], while the host
/// is being constructed. Operations are served by the host's driver.
#[derive(Debug)]
pub struct RoutingTable {
    host: HostHandle,
    mode: RoutingMode,
    bootstrap_peers: Vec<(PeerId, Multiaddr)>,
    closed: AtomicBool,
}

impl RoutingTable {
    fn new(host: HostHandle, mode: RoutingMode, bootstrap_peers: Vec<(PeerId, Multiaddr)>) -> Self {
        Self {
            host,
            mode,
            bootstrap_peers,
            closed: AtomicBool::new(false),
        }
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.host.peer_id()
    }

    pub fn mode(&self) -> RoutingMode {
        self.mode
    }

    pub fn bootstrap_peers(&self) -> &[(PeerId, Multiaddr)] {
        &self.bootstrap_peers
    }

    pub fn provider_ttl(&self) -> Duration {
        PROVIDER_RECORD_TTL
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), NodeError> {
        if self.is_closed() {
            return Err(NodeError::RoutingTableUnavailable(
                "routing table closed".into(),
            ));
        }
        Ok(())
    }

    fn send(&self, command: RoutingCommand) -> Result<(), NodeError> {
        self.ensure_open()?;
        self.host.send(HostCommand::Routing(command))
    }

    /// Start a bootstrap query. Fire-and-forget: the outcome is only logged.
    pub fn bootstrap(&self) -> Result<(), NodeError> {
        self.send(RoutingCommand::Bootstrap)
    }

    pub fn add_address(&self, peer: PeerId, addr: Multiaddr) -> Result<(), NodeError> {
        self.send(RoutingCommand::AddAddress { peer, addr })
    }

    /// Store a provider record for `key` and announce it to the closest peers.
    pub async fn provide(&self, key: RecordKey) -> Result<(), NodeError> {
        self.ensure_open()?;
        self.host
            .request(|reply| HostCommand::Routing(RoutingCommand::StartProviding { key, reply }))
            .await?
    }

    /// Start a provider search. The receiver closes when the search ends.
    pub fn find_providers(
        &self,
        key: RecordKey,
    ) -> Result<mpsc::UnboundedReceiver<PeerInfo>, NodeError> {
        let (results, receiver) = mpsc::unbounded_channel();
        self.send(RoutingCommand::GetProviders { key, results })?;
        Ok(receiver)
    }

    /// Number of peers in the k-buckets.
    pub async fn peer_count(&self) -> Result<usize, NodeError> {
        self.ensure_open()?;
        self.host
            .request(|reply| HostCommand::Routing(RoutingCommand::PeerCount { reply }))
            .await
    }

    /// Stop serving routing operations. Returns false if already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        // The driver may already be gone; the table is closed either way.
        let _ = self.host.send(HostCommand::Routing(RoutingCommand::Close));
        debug!(peer = %self.host.peer_id(), "Routing table close requested");
        true
    }
}

/// Builds a Kademlia routing capability and keeps the resulting table.
pub struct KademliaRouterFactory {
    bootstrap_peers: Vec<String>,
    mode: RoutingMode,
    slot: Mutex<Option<Arc<RoutingTable>>>,
}

impl KademliaRouterFactory {
    pub fn new(bootstrap_peers: Vec<String>, mode: RoutingMode) -> Self {
        Self {
            bootstrap_peers,
            mode,
            slot: Mutex::new(None),
        }
    }

    pub fn from_config(config: &NodeConfig) -> Self {
        Self::new(config.routing.bootstrap_peers.clone(), config.routing.mode)
    }
}

impl PeerRouterFactory for KademliaRouterFactory {
    fn build(&self, host: &EarlyHost<'_>) -> Result<RouterCapability, NodeError> {
        let local = host.peer_id();
        let peers = parse_bootstrap_peers(&self.bootstrap_peers, local)?;

        let mut config = kad::Config::new(kad::PROTOCOL_NAME);
        config.set_provider_record_ttl(Some(PROVIDER_RECORD_TTL));
        config.set_provider_publication_interval(Some(PROVIDER_PUBLICATION_INTERVAL));

        let mut behaviour = kad::Behaviour::with_config(local, MemoryStore::new(local), config);
        behaviour.set_mode(match self.mode {
            RoutingMode::AutoServer => None,
            RoutingMode::Server => Some(kad::Mode::Server),
            RoutingMode::Client => Some(kad::Mode::Client),
        });
        for (peer, addr) in &peers {
            behaviour.add_address(peer, addr.clone());
        }

        info!(
            peer = %local,
            mode = ?self.mode,
            bootstrap_peers = peers.len(),
            "Routing table created"
        );

        let table = Arc::new(RoutingTable::new(host.handle().clone(), self.mode, peers));
        *self.slot.lock() = Some(table);

        Ok(RouterCapability::new(behaviour))
    }

    fn routing_table(&self) -> Option<Arc<RoutingTable>> {
        self.slot.lock().clone()
    }
}

/// Parse `/p2p/`-terminated bootstrap addresses.
///
/// Unusable entries are skipped. An empty list is valid (seed node); a
/// non-empty list with no usable entry is not.
pub fn parse_bootstrap_peers(
    peers: &[String],
    local: PeerId,
) -> Result<Vec<(PeerId, Multiaddr)>, NodeError> {
    let parsed: Vec<_> = peers
        .iter()
        .filter_map(|raw| {
            let Ok(addr) = raw.parse::<Multiaddr>() else {
                warn!(addr = %raw, "Skipping malformed bootstrap address");
                return None;
            };
            let Some((peer, transport)) = split_peer_addr(&addr) else {
                warn!(addr = %raw, "Skipping bootstrap address without peer id");
                return None;
            };
            (peer != local).then_some((peer, transport))
        })
        .collect();

    if parsed.is_empty() && !peers.is_empty() {
        return Err(NodeError::RoutingTableUnavailable(format!(
            "none of the {} bootstrap peers is usable",
            peers.len()
        )));
    }
    Ok(parsed)
}
