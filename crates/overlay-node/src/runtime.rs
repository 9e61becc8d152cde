//! Node runtime: settings, startup and the main loop.

use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};
use futures::StreamExt;
use overlay_p2p::{Node, NodeConfig};
use shared_bus::{EventFilter, EventTopic, NetworkEvent};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default location of the private key.
pub const DEFAULT_IDENTITY_PATH: &str = "./identity.key";

/// Everything the binary reads from its environment.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub config: NodeConfig,
    pub identity_path: PathBuf,
    pub topics: Vec<String>,
}

impl RuntimeSettings {
    /// Load from `OVERLAY_CONFIG` (TOML file, optional), `OVERLAY_*`
    /// overrides, `OVERLAY_IDENTITY` and `OVERLAY_TOPICS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("OVERLAY_CONFIG") {
            Some(path) => NodeConfig::load(&path)
                .with_context(|| format!("Failed to load configuration from {path}"))?,
            None => NodeConfig::default(),
        };
        config
            .apply_overrides(&lookup)
            .context("Invalid OVERLAY_* override")?;

        let identity_path = lookup("OVERLAY_IDENTITY")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_IDENTITY_PATH));
        let topics = lookup("OVERLAY_TOPICS")
            .map(|raw| parse_topics(&raw))
            .unwrap_or_default();

        Ok(Self {
            config,
            identity_path,
            topics,
        })
    }
}

/// Split a comma-separated topic list, dropping blanks and duplicates.
pub fn parse_topics(raw: &str) -> Vec<String> {
    let mut topics: Vec<String> = Vec::new();
    for topic in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if !topics.iter().any(|t| t == topic) {
            topics.push(topic.to_string());
        }
    }
    topics
}

/// A running node plus the task that logs its events.
pub struct OverlayRuntime {
    node: Node,
    event_log: Option<JoinHandle<()>>,
}

impl OverlayRuntime {
    /// Construct the node. Must be called within the Tokio runtime.
    pub fn new(config: NodeConfig, key: &[u8]) -> Result<Self> {
        let node = Node::create(key, config).context("Failed to create overlay node")?;
        Ok(Self {
            node,
            event_log: None,
        })
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Start logging node events and join `topics`.
    pub async fn start(&mut self, topics: &[String]) -> Result<()> {
        info!("===========================================");
        info!("  Overlay Node v{}", env!("CARGO_PKG_VERSION"));
        info!("===========================================");
        info!("Peer ID: {}", self.node.peer_id());
        for addr in self.node.listen_addresses().iter() {
            info!("Listening on {addr}");
        }
        if let Some(e) = self.node.degraded() {
            warn!("Running without routing table: {e}");
        }

        let stream = self
            .node
            .events()
            .event_stream(EventFilter::topics(vec![
                EventTopic::Connections,
                EventTopic::Addresses,
                EventTopic::PubSub,
            ]))
            .context("Event bus closed")?;
        self.event_log = Some(tokio::spawn(stream.for_each(|event| async move {
            log_event(&event);
        })));

        if let Some(pubsub) = self.node.pubsub() {
            for topic in topics {
                pubsub
                    .join(topic)
                    .await
                    .with_context(|| format!("Failed to join topic {topic}"))?;
            }
        }

        info!("Node is running. Press Ctrl+C to stop.");
        Ok(())
    }

    /// Log reachability transitions until `signal` resolves.
    pub async fn run_until<S>(&mut self, signal: S)
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(signal);
        loop {
            let Some(reachability) = self.node.reachability() else {
                signal.await;
                return;
            };
            tokio::select! {
                _ = &mut signal => return,
                change = reachability.recv() => match change {
                    Some(change) => info!("Reachability: {} -> {}", change.old, change.new),
                    None => {
                        signal.await;
                        return;
                    }
                },
            }
        }
    }

    /// Stop the event log and tear the node down.
    pub async fn shutdown(&mut self) {
        info!("Initiating graceful shutdown...");
        let stages = self.node.shutdown().await;
        debug!(?stages, "Node subsystems stopped");
        if let Some(task) = self.event_log.take() {
            task.abort();
        }
        info!("Shutdown complete");
    }
}

fn log_event(event: &NetworkEvent) {
    match event {
        NetworkEvent::PeerConnected(peer) => info!(%peer, "Peer connected"),
        NetworkEvent::PeerDisconnected(peer) => info!(%peer, "Peer disconnected"),
        NetworkEvent::ConnectionPruned(peer) => debug!(%peer, "Connection pruned"),
        NetworkEvent::ListenAddrAdded(addr) => debug!(%addr, "Listen address added"),
        NetworkEvent::ExternalAddrConfirmed(addr) => info!(%addr, "External address confirmed"),
        NetworkEvent::GossipMessage {
            topic,
            source,
            data,
        } => info!(
            %topic,
            source = ?source,
            bytes = data.len(),
            "Gossip message received"
        ),
        NetworkEvent::ReachabilityChanged { .. } => {}
    }
}
