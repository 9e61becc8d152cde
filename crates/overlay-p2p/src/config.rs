//! Node configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration for a node on port 8001 that bootstraps from the public
//! default peers.
//!
//! ```toml
//! port = 8001
//!
//! [connection]
//! low_watermark = 100
//! high_watermark = 400
//! grace_period_secs = 60
//!
//! [routing]
//! bootstrap_peers = ["/ip4/203.0.113.7/tcp/4001/p2p/12D3KooW..."]
//! mode = "auto-server"
//! allow_degraded_routing = false
//!
//! [nat]
//! port_map = true
//! relay_service = true
//! auto_relay = true
//!
//! [gossip]
//! heartbeat_ms = 1000
//! discovery_interval_secs = 30
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::adapters::routing::DEFAULT_BOOTSTRAP_PEERS;
use crate::domain::{ConnectionPolicy, ListenAddressSet, NodeError};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {error}")]
    Io { path: String, error: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Operating mode of the routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingMode {
    /// Serve queries once an external address is confirmed.
    #[default]
    AutoServer,
    /// Always serve queries.
    Server,
    /// Never serve queries.
    Client,
}

/// Top-level node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Port shared by all four listeners.
    pub port: u16,
    pub listen_ipv4: Ipv4Addr,
    pub listen_ipv6: Ipv6Addr,
    pub connection: ConnectionSection,
    pub routing: RoutingSection,
    pub nat: NatSection,
    pub gossip: GossipSection,
    pub idle_connection_timeout_secs: u64,
    /// Buffered events per bus subscriber.
    pub event_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSection {
    pub low_watermark: usize,
    pub high_watermark: usize,
    pub grace_period_secs: u64,
    /// How often the connection manager runs a trimming round.
    pub prune_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSection {
    /// Multiaddresses ending in `/p2p/<peer id>`. Empty for a seed node.
    pub bootstrap_peers: Vec<String>,
    pub mode: RoutingMode,
    /// Return a node without routing table when the table cannot be built.
    pub allow_degraded_routing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NatSection {
    /// Ask the gateway for a port mapping (UPnP).
    pub port_map: bool,
    /// Offer AutoNAT probes and circuit relay to other peers.
    pub relay_service: bool,
    /// Reserve a slot on a relay peer while we are privately reachable.
    pub auto_relay: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipSection {
    pub heartbeat_ms: u64,
    pub mesh_n: usize,
    pub mesh_n_low: usize,
    pub mesh_n_high: usize,
    /// Delay between discovery rounds for each joined topic.
    pub discovery_interval_secs: u64,
    /// Upper bound on dials started per discovery round.
    pub max_dial_per_round: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: 8001,
            listen_ipv4: Ipv4Addr::UNSPECIFIED,
            listen_ipv6: Ipv6Addr::UNSPECIFIED,
            connection: ConnectionSection::default(),
            routing: RoutingSection::default(),
            nat: NatSection::default(),
            gossip: GossipSection::default(),
            idle_connection_timeout_secs: 60,
            event_capacity: shared_bus::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            low_watermark: 100,
            high_watermark: 400,
            grace_period_secs: 60,
            prune_interval_secs: 10,
        }
    }
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            bootstrap_peers: DEFAULT_BOOTSTRAP_PEERS.iter().map(|s| s.to_string()).collect(),
            mode: RoutingMode::AutoServer,
            allow_degraded_routing: false,
        }
    }
}

impl Default for NatSection {
    fn default() -> Self {
        Self {
            port_map: true,
            relay_service: true,
            auto_relay: true,
        }
    }
}

impl Default for GossipSection {
    fn default() -> Self {
        Self {
            heartbeat_ms: 1000,
            mesh_n: 6,
            mesh_n_low: 5,
            mesh_n_high: 12,
            discovery_interval_secs: 30,
            max_dial_per_round: 8,
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;

        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `OVERLAY_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("OVERLAY_PORT") {
            self.port = parse_value("OVERLAY_PORT", &port)?;
        }
        if let Some(peers) = lookup("OVERLAY_BOOTSTRAP_PEERS") {
            self.routing.bootstrap_peers = peers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(mode) = lookup("OVERLAY_ROUTING_MODE") {
            self.routing.mode = match mode.as_str() {
                "auto-server" => RoutingMode::AutoServer,
                "server" => RoutingMode::Server,
                "client" => RoutingMode::Client,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "OVERLAY_ROUTING_MODE".into(),
                        value: mode,
                    })
                }
            };
        }
        if let Some(flag) = lookup("OVERLAY_ALLOW_DEGRADED_ROUTING") {
            self.routing.allow_degraded_routing = parse_value("OVERLAY_ALLOW_DEGRADED_ROUTING", &flag)?;
        }
        Ok(())
    }

    /// Validated connection policy.
    pub fn connection_policy(&self) -> Result<ConnectionPolicy, NodeError> {
        ConnectionPolicy::new(
            self.connection.low_watermark,
            self.connection.high_watermark,
            Duration::from_secs(self.connection.grace_period_secs),
        )
    }

    pub fn listen_addresses(&self) -> ListenAddressSet {
        ListenAddressSet::with_hosts(self.port, self.listen_ipv4, self.listen_ipv6)
    }

    pub fn idle_connection_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_connection_timeout_secs)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.connection.prune_interval_secs.max(1))
    }

    /// Local-only configuration for tests: loopback hosts, ephemeral port,
    /// no bootstrap peers and no gateway port mapping.
    pub fn local(port: u16) -> Self {
        Self {
            port,
            listen_ipv4: Ipv4Addr::LOCALHOST,
            listen_ipv6: Ipv6Addr::LOCALHOST,
            routing: RoutingSection {
                bootstrap_peers: Vec::new(),
                mode: RoutingMode::Server,
                allow_degraded_routing: false,
            },
            nat: NatSection {
                port_map: false,
                relay_service: true,
                auto_relay: true,
            },
            ..Self::default()
        }
    }
}

impl GossipSection {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs.max(1))
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
