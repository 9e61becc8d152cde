//! # Test Fixtures
//!
//! Shared helpers for bringing up loopback nodes.

use std::time::Duration;

use libp2p::multiaddr::Protocol;
use libp2p::Multiaddr;
use overlay_p2p::{Node, NodeConfig, NodeError, NodeIdentity};

/// Upper bound for anything that waits on the network.
pub const NETWORK_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay between retries of an operation that depends on mesh or table state.
pub const RETRY_DELAY: Duration = Duration::from_millis(250);

pub fn fresh_key() -> Vec<u8> {
    NodeIdentity::generate()
        .to_bytes()
        .expect("ed25519 keys always encode")
}

/// A seed: loopback, ephemeral port, no bootstrap peers.
pub fn seed_config() -> NodeConfig {
    NodeConfig::local(0)
}

/// A loopback node that bootstraps from `seed`.
pub fn peer_config(seed: &Multiaddr) -> NodeConfig {
    let mut config = NodeConfig::local(0);
    config.routing.bootstrap_peers = vec![seed.to_string()];
    config
}

/// Reserve a port number that is free right now on IPv4 loopback.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .expect("ephemeral port available")
}

/// Create a node, or `None` when the host has no IPv6 loopback.
pub fn try_node(key: &[u8], config: NodeConfig) -> Option<Node> {
    match Node::create(key, config) {
        Ok(node) => Some(node),
        Err(e) if binds_ipv6(&e) => {
            eprintln!("skipping: {e}");
            None
        }
        Err(e) => panic!("node creation failed: {e}"),
    }
}

pub fn binds_ipv6(error: &NodeError) -> bool {
    matches!(error, NodeError::TransportBindFailed { address, .. } if address.contains("/ip6/"))
}

/// The node's IPv4 TCP address with `/p2p/<peer>` appended, once the
/// listener reports its real port.
pub async fn dialable_tcp_addr(node: &Node) -> Multiaddr {
    let deadline = tokio::time::Instant::now() + NETWORK_TIMEOUT;
    loop {
        let addrs = node.host().listen_addrs().await.expect("host running");
        let tcp = addrs.into_iter().find(|addr| {
            let mut parts = addr.iter();
            matches!(parts.next(), Some(Protocol::Ip4(_)))
                && matches!(parts.next(), Some(Protocol::Tcp(port)) if port != 0)
        });
        if let Some(addr) = tcp {
            return addr.with(Protocol::P2p(node.peer_id()));
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "no tcp listener reported"
        );
        tokio::time::sleep(RETRY_DELAY).await;
    }
}

/// Retry `create` until the port set is free again.
pub async fn create_when_released(key: &[u8], config: NodeConfig) -> Result<Node, NodeError> {
    let mut last = None;
    for _ in 0..40 {
        match Node::create(key, config.clone()) {
            Ok(node) => return Ok(node),
            Err(e @ NodeError::TransportBindFailed { .. }) => last = Some(e),
            Err(e) => return Err(e),
        }
        tokio::time::sleep(RETRY_DELAY).await;
    }
    Err(last.unwrap_or(NodeError::HostClosed))
}
