//! Gossip pub/sub.
//!
//! The gossip engine is built last, after discovery, and installed into the
//! host before it starts. Joining a topic advertises the topic name through
//! discovery and starts a loop that looks for other members and dials them,
//! so the mesh forms without any manual peering.

use futures::StreamExt;
use libp2p::gossipsub::{self, MessageAuthenticity, MessageId, ValidationMode};
use libp2p::identity::Keypair;
use libp2p::PeerId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::discovery::RoutingDiscovery;
use super::host::{HostCommand, HostHandle, PendingHost, PubSubCommand};
use crate::config::GossipSection;
use crate::domain::NodeError;
use crate::ports::DiscoveryApi;

/// Builds the gossip engine for a pending host.
pub struct PubSubBuilder<'a> {
    config: &'a GossipSection,
}

impl<'a> PubSubBuilder<'a> {
    pub fn new(config: &'a GossipSection) -> Self {
        Self { config }
    }

    /// Build the engine, install it into `host` and return the router.
    ///
    /// Without discovery (degraded node) the router only reaches peers that
    /// are dialed or added explicitly.
    pub fn build(
        &self,
        host: &mut PendingHost,
        keypair: &Keypair,
        discovery: Option<Arc<RoutingDiscovery>>,
    ) -> Result<GossipRouter, NodeError> {
        if self.config.heartbeat_ms == 0 {
            return Err(NodeError::PubSubInitFailed(
                "heartbeat interval must be non-zero".into(),
            ));
        }

        let config = gossipsub::ConfigBuilder::default()
            .heartbeat_interval(self.config.heartbeat())
            .mesh_n(self.config.mesh_n)
            .mesh_n_low(self.config.mesh_n_low)
            .mesh_n_high(self.config.mesh_n_high)
            .validation_mode(ValidationMode::Strict)
            .build()
            .map_err(|e| NodeError::PubSubInitFailed(e.to_string()))?;

        let behaviour =
            gossipsub::Behaviour::new(MessageAuthenticity::Signed(keypair.clone()), config)
                .map_err(|e| NodeError::PubSubInitFailed(e.to_string()))?;

        host.install_pubsub(behaviour);
        info!(discovery = discovery.is_some(), "Pub/sub router created");

        Ok(GossipRouter {
            host: host.handle().clone(),
            discovery,
            config: self.config.clone(),
            topics: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }
}

/// Topic membership and publishing.
pub struct GossipRouter {
    host: HostHandle,
    discovery: Option<Arc<RoutingDiscovery>>,
    config: GossipSection,
    /// Joined topics and their discovery loops.
    topics: Mutex<HashMap<String, Option<JoinHandle<()>>>>,
    closed: AtomicBool,
}

impl GossipRouter {
    fn ensure_open(&self) -> Result<(), NodeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NodeError::Topic("pub/sub router closed".into()));
        }
        Ok(())
    }

    /// Subscribe to `topic`. Returns false if already joined.
    pub async fn join(&self, topic: &str) -> Result<bool, NodeError> {
        self.ensure_open()?;
        let joined = self
            .host
            .request(|reply| {
                HostCommand::PubSub(PubSubCommand::Subscribe {
                    topic: topic.to_string(),
                    reply,
                })
            })
            .await??;
        if !joined {
            return Ok(false);
        }

        let task = self.discovery.clone().map(|discovery| {
            tokio::spawn(discover_topic_peers(
                self.host.clone(),
                discovery,
                topic.to_string(),
                self.config.clone(),
            ))
        });
        self.topics.lock().insert(topic.to_string(), task);

        info!(%topic, "Joined topic");
        Ok(true)
    }

    /// Unsubscribe from `topic`. Returns false if it was not joined.
    pub async fn leave(&self, topic: &str) -> Result<bool, NodeError> {
        self.ensure_open()?;
        if let Some(Some(task)) = self.topics.lock().remove(topic) {
            task.abort();
        }
        let left = self
            .host
            .request(|reply| {
                HostCommand::PubSub(PubSubCommand::Unsubscribe {
                    topic: topic.to_string(),
                    reply,
                })
            })
            .await?;
        if left {
            info!(%topic, "Left topic");
        }
        Ok(left)
    }

    pub async fn publish(
        &self,
        topic: &str,
        data: impl Into<Vec<u8>>,
    ) -> Result<MessageId, NodeError> {
        self.ensure_open()?;
        let data = data.into();
        self.host
            .request(|reply| {
                HostCommand::PubSub(PubSubCommand::Publish {
                    topic: topic.to_string(),
                    data,
                    reply,
                })
            })
            .await?
    }

    /// Always forward to and accept from `peer`, mesh or not.
    pub fn add_explicit_peer(&self, peer: PeerId) -> Result<(), NodeError> {
        self.ensure_open()?;
        self.host
            .send(HostCommand::PubSub(PubSubCommand::AddExplicitPeer(peer)))
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.lock().keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn has_discovery(&self) -> bool {
        self.discovery.is_some()
    }

    /// Stop every discovery loop and leave every topic. Returns false if
    /// already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.abort_loops();
        let _ = self.host.send(HostCommand::PubSub(PubSubCommand::Close));
        debug!("Pub/sub router closed");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn abort_loops(&self) {
        for (_, task) in self.topics.lock().drain() {
            if let Some(task) = task {
                task.abort();
            }
        }
    }
}

impl Drop for GossipRouter {
    fn drop(&mut self) {
        self.abort_loops();
    }
}

/// Advertise the topic, then periodically look for other members and dial
/// the ones we are not connected to.
async fn discover_topic_peers(
    host: HostHandle,
    discovery: Arc<RoutingDiscovery>,
    topic: String,
    config: GossipSection,
) {
    match discovery.advertise(&topic).await {
        Ok(ttl) => debug!(%topic, ?ttl, "Topic advertised"),
        Err(e) => warn!(%topic, error = %e, "Failed to advertise topic"),
    }

    let mut ticker = tokio::time::interval(config.discovery_interval());
    loop {
        ticker.tick().await;

        let connected: HashSet<PeerId> = match host.connected_peers().await {
            Ok(peers) => peers.into_iter().collect(),
            Err(_) => return,
        };

        let mut peers = match discovery.find_peers(&topic).await {
            Ok(peers) => peers,
            Err(NodeError::RoutingTableUnavailable(_)) => return,
            Err(e) => {
                debug!(%topic, error = %e, "Topic peer search failed");
                continue;
            }
        };

        let mut dialed = 0;
        while let Some(peer) = peers.next().await {
            if dialed >= config.max_dial_per_round {
                break;
            }
            if connected.contains(&peer.peer_id) {
                continue;
            }
            debug!(%topic, peer = %peer.peer_id, "Dialing topic peer");
            if host.dial_peer(peer).is_err() {
                return;
            }
            dialed += 1;
        }
    }
}
