//! Namespace discovery over the routing table.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use super::routing::RoutingTable;
use crate::domain::{namespace_key, NodeError};
use crate::ports::{DiscoveryApi, PeerStream};

/// Discovery backed by provider records in the routing table.
///
/// Holds only a weak reference: the node owns the table, and discovery
/// reports [`NodeError::RoutingTableUnavailable`] once it is gone.
#[derive(Debug)]
pub struct RoutingDiscovery {
    table: Weak<RoutingTable>,
    closed: AtomicBool,
}

impl RoutingDiscovery {
    pub fn new(table: &Arc<RoutingTable>) -> Self {
        Self {
            table: Arc::downgrade(table),
            closed: AtomicBool::new(false),
        }
    }

    /// The wrapped routing table, while it is alive.
    pub fn routing_table(&self) -> Option<Arc<RoutingTable>> {
        self.table.upgrade()
    }

    /// Returns false if already closed.
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            debug!("Discovery closed");
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn table(&self) -> Result<Arc<RoutingTable>, NodeError> {
        if self.is_closed() {
            return Err(NodeError::RoutingTableUnavailable("discovery closed".into()));
        }
        self.table
            .upgrade()
            .filter(|t| !t.is_closed())
            .ok_or_else(|| NodeError::RoutingTableUnavailable("routing table dropped".into()))
    }
}

#[async_trait]
impl DiscoveryApi for RoutingDiscovery {
    async fn advertise(&self, namespace: &str) -> Result<Duration, NodeError> {
        let table = self.table()?;
        table.provide(namespace_key(namespace)).await?;
        debug!(%namespace, "Advertised");
        Ok(table.provider_ttl())
    }

    async fn find_peers(&self, namespace: &str) -> Result<PeerStream, NodeError> {
        let receiver = self.table()?.find_providers(namespace_key(namespace))?;
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }
}
