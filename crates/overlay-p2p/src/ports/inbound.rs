//! Driving ports: the discovery API applications call.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;

use crate::domain::{NodeError, PeerInfo};

/// Finite stream of peers found for one search. Ends when the search ends.
pub type PeerStream = Pin<Box<dyn Stream<Item = PeerInfo> + Send>>;

/// Namespace-based peer discovery.
///
/// # Example
///
/// ```rust,ignore
/// let ttl = discovery.advertise("chat").await?;
/// let mut peers = discovery.find_peers("chat").await?;
/// while let Some(peer) = peers.next().await {
///     println!("found {}", peer.peer_id);
/// }
/// ```
#[async_trait]
pub trait DiscoveryApi: Send + Sync {
    /// Announce this node under `namespace`.
    ///
    /// # Returns
    ///
    /// How long the announcement stays valid before it must be renewed.
    async fn advertise(&self, namespace: &str) -> Result<Duration, NodeError>;

    /// Search for peers announced under `namespace`.
    ///
    /// The stream is lazy and finite; call again to search again. The local
    /// node is never yielded.
    async fn find_peers(&self, namespace: &str) -> Result<PeerStream, NodeError>;
}
