//! # Node
//!
//! Owns every subsystem of a running overlay node and sequences their
//! construction and teardown.
//!
//! ## Construction Order
//!
//! Each step consumes a handle produced by an earlier one:
//!
//! ```text
//! Phase 1: Identity            (decode private key)
//! Phase 2: Connection policy   (validate watermarks)
//! Phase 3: Transport           (invokes the router factory, opens listeners)
//! Phase 4: Routing table       (taken from the factory)
//! Phase 5: Reachability        (bus subscription)
//! Phase 6: Discovery           (wraps the routing table)
//! Phase 7: Pub/sub             (wraps discovery)
//! Phase 8: Host start          (driver task spawned, bootstrap queued)
//! ```
//!
//! Phases 1 and 2 do no I/O. If any later phase fails, everything acquired
//! so far is released in reverse order before the error is returned.
//! Teardown runs the same list backwards.

use libp2p::PeerId;
use shared_bus::{EventPublisher, InMemoryEventBus};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{
    Assembled, GossipRouter, HostHandle, KademliaRouterFactory, PendingHost, PubSubBuilder,
    ReachabilityMonitor, ReachabilitySubscription, RoutingDiscovery, RoutingTable, RunningHost,
    TransportAssembler,
};
use crate::config::NodeConfig;
use crate::domain::{ListenAddressSet, NodeError, NodeIdentity};
use crate::ports::PeerRouterFactory;

/// Teardown stages, in the order [`Node::shutdown`] performs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStage {
    PubSub,
    Discovery,
    RoutingTable,
    Reachability,
    Transport,
}

/// A fully constructed overlay node.
pub struct Node {
    peer_id: PeerId,
    handle: HostHandle,
    listen_addresses: ListenAddressSet,
    events: Arc<InMemoryEventBus>,
    host: Option<RunningHost>,
    routing_table: Option<Arc<RoutingTable>>,
    reachability: Option<ReachabilitySubscription>,
    discovery: Option<Arc<RoutingDiscovery>>,
    pubsub: Option<Arc<GossipRouter>>,
    degraded: Option<NodeError>,
}

/// Configures and constructs a [`Node`].
pub struct NodeBuilder {
    config: NodeConfig,
    factory: Option<Arc<dyn PeerRouterFactory>>,
    events: Option<Arc<InMemoryEventBus>>,
}

impl NodeBuilder {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            factory: None,
            events: None,
        }
    }

    /// Replace the default Kademlia router factory.
    pub fn with_router_factory(mut self, factory: Arc<dyn PeerRouterFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Publish node events on an existing bus instead of a private one.
    pub fn with_event_bus(mut self, events: Arc<InMemoryEventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Construct the node from a serialized private key.
    ///
    /// Synchronous, but must be called within a Tokio runtime: the QUIC
    /// listeners and the host driver are spawned onto it.
    #[instrument(name = "node_create", skip_all, fields(port = self.config.port))]
    pub fn build(self, key: &[u8]) -> Result<Node, NodeError> {
        let config = self.config;

        info!("Phase 1: Decoding identity");
        let identity = NodeIdentity::from_bytes(key)?;

        info!("Phase 2: Validating connection policy");
        let policy = config.connection_policy()?;

        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(KademliaRouterFactory::from_config(&config)));
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(InMemoryEventBus::with_capacity(config.event_capacity)));

        info!("Phase 3: Assembling transport");
        let Assembled {
            host: mut pending,
            routing_error,
        } = TransportAssembler::new(&config).assemble(&identity, policy, factory.as_ref())?;

        info!("Phase 4: Taking routing table");
        let (routing_table, degraded) = match (routing_error, factory.routing_table()) {
            (None, Some(table)) => (Some(table), None),
            (error, _) => {
                let error = error.unwrap_or_else(|| {
                    NodeError::RoutingTableUnavailable("router factory kept no routing table".into())
                });
                if !config.routing.allow_degraded_routing {
                    return Err(unwind(error, None, None, None, pending));
                }
                warn!(error = %error, "Node is degraded: no routing table, no discovery");
                (None, Some(error))
            }
        };

        info!("Phase 5: Subscribing to reachability");
        let reachability = match ReachabilityMonitor::subscribe(&events) {
            Ok(subscription) => subscription,
            Err(e) => return Err(unwind(e, None, None, routing_table, pending)),
        };

        info!("Phase 6: Creating discovery");
        let discovery = routing_table
            .as_ref()
            .map(|table| Arc::new(RoutingDiscovery::new(table)));

        info!("Phase 7: Creating pub/sub router");
        let pubsub = match PubSubBuilder::new(&config.gossip).build(
            &mut pending,
            identity.keypair(),
            discovery.clone(),
        ) {
            Ok(router) => Arc::new(router),
            Err(e) => {
                return Err(unwind(
                    e,
                    discovery,
                    Some(reachability),
                    routing_table,
                    pending,
                ))
            }
        };

        info!("Phase 8: Starting host");
        let handle = pending.handle().clone();
        let listen_addresses = pending.listen_addresses().clone();
        let publisher: Arc<dyn EventPublisher> = events.clone();
        let host = pending.start(publisher);

        if let Some(table) = &routing_table {
            if let Err(e) = table.bootstrap() {
                debug!(error = %e, "Bootstrap not queued");
            }
        }

        info!(peer = %identity.peer_id(), degraded = degraded.is_some(), "Node ready");

        Ok(Node {
            peer_id: identity.peer_id(),
            handle,
            listen_addresses,
            events,
            host: Some(host),
            routing_table,
            reachability: Some(reachability),
            discovery,
            pubsub: Some(pubsub),
            degraded,
        })
    }
}

/// Release partially constructed state in reverse order.
fn unwind(
    error: NodeError,
    discovery: Option<Arc<RoutingDiscovery>>,
    reachability: Option<ReachabilitySubscription>,
    routing_table: Option<Arc<RoutingTable>>,
    host: PendingHost,
) -> NodeError {
    warn!(step = ?error.step(), error = %error, "Node construction failed, releasing resources");
    if let Some(discovery) = discovery {
        discovery.close();
    }
    if let Some(mut reachability) = reachability {
        reachability.close();
    }
    if let Some(table) = routing_table {
        table.close();
    }
    host.close();
    error
}

impl Node {
    /// Construct a node with the default router factory.
    pub fn create(key: &[u8], config: NodeConfig) -> Result<Self, NodeError> {
        NodeBuilder::new(config).build(key)
    }

    /// Construct a node with a custom router factory.
    pub fn create_with_factory(
        key: &[u8],
        config: NodeConfig,
        factory: Arc<dyn PeerRouterFactory>,
    ) -> Result<Self, NodeError> {
        NodeBuilder::new(config)
            .with_router_factory(factory)
            .build(key)
    }

    pub fn builder(config: NodeConfig) -> NodeBuilder {
        NodeBuilder::new(config)
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn host(&self) -> &HostHandle {
        &self.handle
    }

    pub fn listen_addresses(&self) -> &ListenAddressSet {
        &self.listen_addresses
    }

    pub fn events(&self) -> &Arc<InMemoryEventBus> {
        &self.events
    }

    /// `None` on a degraded node and after shutdown.
    pub fn routing_table(&self) -> Option<&Arc<RoutingTable>> {
        self.routing_table.as_ref()
    }

    /// `None` on a degraded node and after shutdown.
    pub fn discovery(&self) -> Option<&Arc<RoutingDiscovery>> {
        self.discovery.as_ref()
    }

    pub fn pubsub(&self) -> Option<&Arc<GossipRouter>> {
        self.pubsub.as_ref()
    }

    pub fn reachability(&mut self) -> Option<&mut ReachabilitySubscription> {
        self.reachability.as_mut()
    }

    /// The routing failure this node was built around, if any.
    pub fn degraded(&self) -> Option<&NodeError> {
        self.degraded.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.host.as_ref().is_some_and(RunningHost::is_running)
    }

    /// Tear down in reverse construction order.
    ///
    /// Returns the stages performed; a second call performs none.
    pub async fn shutdown(&mut self) -> Vec<ShutdownStage> {
        let mut stages = Vec::new();

        if let Some(pubsub) = self.pubsub.take() {
            pubsub.close();
            stages.push(ShutdownStage::PubSub);
        }
        if let Some(discovery) = self.discovery.take() {
            discovery.close();
            stages.push(ShutdownStage::Discovery);
        }
        if let Some(table) = self.routing_table.take() {
            table.close();
            stages.push(ShutdownStage::RoutingTable);
        }
        if let Some(mut reachability) = self.reachability.take() {
            reachability.close();
            stages.push(ShutdownStage::Reachability);
        }
        if let Some(mut host) = self.host.take() {
            host.close().await;
            stages.push(ShutdownStage::Transport);
        }

        if !stages.is_empty() {
            info!(peer = %self.peer_id, "Node shut down");
        }
        stages
    }
}
