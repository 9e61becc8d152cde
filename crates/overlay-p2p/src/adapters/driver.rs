//! Swarm driver: the task that owns and polls the swarm.

use futures::StreamExt;
use libp2p::gossipsub::IdentTopic;
use libp2p::kad::{self, GetProvidersOk, QueryId, QueryResult};
use libp2p::swarm::dial_opts::{DialOpts, PeerCondition};
use libp2p::swarm::SwarmEvent;
use libp2p::{autonat, gossipsub, identify, relay, upnp, Multiaddr, PeerId, Swarm};
use shared_bus::{EventPublisher, NetworkEvent, Reachability};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::behaviour::{OverlayBehaviour, OverlayBehaviourEvent};
use super::host::{HostCommand, PubSubCommand, RoutingCommand};
use super::reachability::ReachabilityTracker;
use super::relay::{AutoRelay, HOP_PROTOCOL};
use crate::domain::{ConnectionManager, ConnectionPolicy, NodeError, PeerInfo};

/// Score bonus for peers that share a gossip topic with us.
const TOPIC_PEER_SCORE: f64 = 1.0;

/// Addresses remembered per peer.
const MAX_ADDRS_PER_PEER: usize = 8;

struct ProviderQuery {
    results: mpsc::UnboundedSender<PeerInfo>,
    seen: HashSet<PeerId>,
}

pub(crate) struct SwarmDriver {
    swarm: Swarm<OverlayBehaviour>,
    commands: mpsc::UnboundedReceiver<HostCommand>,
    shutdown: watch::Receiver<bool>,
    events: Arc<dyn EventPublisher>,
    connections: ConnectionManager,
    prune_interval: Duration,
    reachability: ReachabilityTracker,
    auto_relay: AutoRelay,
    address_book: HashMap<PeerId, HashSet<Multiaddr>>,
    pending_provide: HashMap<QueryId, oneshot::Sender<Result<(), NodeError>>>,
    pending_providers: HashMap<QueryId, ProviderQuery>,
    topics: HashSet<String>,
    routing_open: bool,
    pubsub_open: bool,
}

impl SwarmDriver {
    pub(crate) fn new(
        swarm: Swarm<OverlayBehaviour>,
        commands: mpsc::UnboundedReceiver<HostCommand>,
        shutdown: watch::Receiver<bool>,
        events: Arc<dyn EventPublisher>,
        policy: ConnectionPolicy,
        prune_interval: Duration,
    ) -> Self {
        let routing_open = swarm.behaviour().kademlia.is_enabled();
        let pubsub_open = swarm.behaviour().gossipsub.is_enabled();
        let auto_relay = AutoRelay::new(swarm.behaviour().relay_client.is_enabled());
        Self {
            swarm,
            commands,
            shutdown,
            events,
            connections: ConnectionManager::new(policy),
            prune_interval,
            reachability: ReachabilityTracker::new(),
            auto_relay,
            address_book: HashMap::new(),
            pending_provide: HashMap::new(),
            pending_providers: HashMap::new(),
            topics: HashSet::new(),
            routing_open,
            pubsub_open,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut prune = tokio::time::interval(self.prune_interval);
        prune.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(peer = %self.swarm.local_peer_id(), "Swarm driver started");

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    debug!("Shutdown signal received");
                    break;
                }
                event = self.swarm.select_next_some() => {
                    self.handle_swarm_event(event).await;
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All host handles dropped");
                        break;
                    }
                },
                _ = prune.tick() => {
                    self.trim_connections().await;
                }
            }
        }

        self.fail_pending_queries();
        info!(peer = %self.swarm.local_peer_id(), "Swarm driver stopped");
    }

    // =========================================================================
    // SWARM EVENTS
    // =========================================================================

    async fn handle_swarm_event(&mut self, event: SwarmEvent<OverlayBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(%address, "Listening");
                self.events
                    .publish(NetworkEvent::ListenAddrAdded(address))
                    .await;
            }
            SwarmEvent::ConnectionEstablished {
                peer_id,
                num_established,
                ..
            } => {
                if num_established.get() == 1 && self.connections.connected(peer_id, Instant::now())
                {
                    debug!(peer = %peer_id, "Peer connected");
                    self.events
                        .publish(NetworkEvent::PeerConnected(peer_id))
                        .await;
                }
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                if num_established == 0 {
                    self.connections.disconnected(&peer_id);
                    if let Some(listener) = self.auto_relay.remove_candidate(&peer_id) {
                        info!(relay = %peer_id, "Relay disconnected, dropping reservation");
                        self.swarm.remove_listener(listener);
                        self.reserve_relay();
                    }
                    debug!(peer = %peer_id, "Peer disconnected");
                    self.events
                        .publish(NetworkEvent::PeerDisconnected(peer_id))
                        .await;
                }
            }
            SwarmEvent::ListenerClosed {
                listener_id,
                reason,
                ..
            } => {
                if self.auto_relay.listener_closed(listener_id) {
                    warn!(?reason, "Relay reservation lost");
                    self.reserve_relay();
                }
            }
            SwarmEvent::ExternalAddrConfirmed { address } => {
                info!(%address, "External address confirmed");
                self.events
                    .publish(NetworkEvent::ExternalAddrConfirmed(address))
                    .await;
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                debug!(peer = ?peer_id, error = %error, "Outgoing connection failed");
            }
            SwarmEvent::Behaviour(event) => self.handle_behaviour_event(event).await,
            _ => {}
        }
    }

    async fn handle_behaviour_event(&mut self, event: OverlayBehaviourEvent) {
        match event {
            OverlayBehaviourEvent::Kademlia(kad::Event::OutboundQueryProgressed {
                id,
                result,
                step,
                ..
            }) => self.handle_query_progress(id, result, step.last),
            OverlayBehaviourEvent::Kademlia(kad::Event::RoutingUpdated {
                peer, addresses, ..
            }) => {
                debug!(peer = %peer, "Routing table updated");
                self.remember(peer, addresses.iter().cloned());
            }
            OverlayBehaviourEvent::Identify(identify::Event::Received { peer_id, info, .. }) => {
                let speaks_kad = info
                    .protocols
                    .iter()
                    .any(|p| *p == kad::PROTOCOL_NAME);
                let offers_relay = info.protocols.iter().any(|p| *p == HOP_PROTOCOL);
                self.remember(peer_id, info.listen_addrs.iter().cloned());

                if offers_relay && self.auto_relay.add_candidate(peer_id, &info.listen_addrs) {
                    debug!(relay = %peer_id, "Relay candidate found");
                    self.reserve_relay();
                }

                if speaks_kad && self.routing_open {
                    if let Some(kademlia) = self.swarm.behaviour_mut().kademlia.as_mut() {
                        for addr in info.listen_addrs {
                            kademlia.add_address(&peer_id, addr);
                        }
                    }
                }
            }
            OverlayBehaviourEvent::Autonat(autonat::Event::StatusChanged { new, .. }) => {
                let Some(change) = self.reachability.observe(&new) else {
                    return;
                };
                info!(old = %change.old, new = %change.new, "Reachability changed");
                match change.new {
                    Reachability::Private => self.reserve_relay(),
                    _ => self.release_relay(),
                }
                self.events
                    .publish(NetworkEvent::ReachabilityChanged {
                        old: change.old,
                        new: change.new,
                    })
                    .await;
            }
            OverlayBehaviourEvent::RelayClient(event) => match event {
                relay::client::Event::ReservationReqAccepted {
                    relay_peer_id,
                    renewal,
                    ..
                } => {
                    if !renewal {
                        info!(relay = %relay_peer_id, "Relay reservation accepted");
                    }
                }
                relay::client::Event::OutboundCircuitEstablished { relay_peer_id, .. } => {
                    debug!(relay = %relay_peer_id, "Outbound relay circuit established");
                }
                relay::client::Event::InboundCircuitEstablished { src_peer_id, .. } => {
                    debug!(peer = %src_peer_id, "Inbound relay circuit established");
                }
                #[allow(unreachable_patterns)]
                _ => {}
            },
            OverlayBehaviourEvent::Upnp(event) => match event {
                upnp::Event::NewExternalAddr(addr) => info!(%addr, "Port mapping established"),
                upnp::Event::ExpiredExternalAddr(addr) => debug!(%addr, "Port mapping expired"),
                upnp::Event::GatewayNotFound => info!("No UPnP gateway found"),
                upnp::Event::NonRoutableGateway => warn!("UPnP gateway is not routable"),
            },
            OverlayBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            }) => {
                debug!(
                    topic = %message.topic,
                    from = %propagation_source,
                    bytes = message.data.len(),
                    "Gossip message received"
                );
                self.events
                    .publish(NetworkEvent::GossipMessage {
                        topic: message.topic.as_str().to_string(),
                        source: message.source,
                        data: message.data,
                    })
                    .await;
            }
            OverlayBehaviourEvent::Gossipsub(gossipsub::Event::Subscribed { peer_id, topic }) => {
                debug!(peer = %peer_id, %topic, "Peer joined topic");
                self.connections.adjust_score(&peer_id, TOPIC_PEER_SCORE);
                if self.topics.contains(topic.as_str()) {
                    self.connections.topic_shared(peer_id, topic.as_str());
                }
            }
            OverlayBehaviourEvent::Gossipsub(gossipsub::Event::Unsubscribed { peer_id, topic }) => {
                self.connections.adjust_score(&peer_id, -TOPIC_PEER_SCORE);
                self.connections.topic_unshared(&peer_id, topic.as_str());
            }
            _ => {}
        }
    }

    fn handle_query_progress(&mut self, id: QueryId, result: QueryResult, last: bool) {
        match result {
            QueryResult::StartProviding(result) => {
                if let Some(reply) = self.pending_provide.remove(&id) {
                    let _ = reply.send(
                        result
                            .map(|_| ())
                            .map_err(|e| NodeError::Query(e.to_string())),
                    );
                }
            }
            QueryResult::GetProviders(Ok(GetProvidersOk::FoundProviders { providers, .. })) => {
                self.forward_providers(id, providers);
            }
            QueryResult::GetProviders(Ok(GetProvidersOk::FinishedWithNoAdditionalRecord {
                ..
            })) => {}
            QueryResult::GetProviders(Err(e)) => {
                debug!(error = %e, "Provider query failed");
            }
            QueryResult::Bootstrap(Ok(ok)) => {
                debug!(remaining = ok.num_remaining, "Bootstrap step finished");
            }
            QueryResult::Bootstrap(Err(e)) => {
                debug!(error = %e, "Bootstrap failed");
            }
            _ => {}
        }

        if last {
            // Dropping the sender ends the consumer's stream.
            self.pending_providers.remove(&id);
        }
    }

    fn forward_providers(&mut self, id: QueryId, providers: HashSet<PeerId>) {
        let local = *self.swarm.local_peer_id();
        let Some(query) = self.pending_providers.get_mut(&id) else {
            return;
        };

        for peer_id in providers {
            if peer_id == local || !query.seen.insert(peer_id) {
                continue;
            }
            let addrs = self
                .address_book
                .get(&peer_id)
                .map(|a| a.iter().cloned().collect())
                .unwrap_or_default();

            if query.results.send(PeerInfo::new(peer_id, addrs)).is_err() {
                // Consumer went away; stop the query early.
                self.pending_providers.remove(&id);
                if let Some(kademlia) = self.swarm.behaviour_mut().kademlia.as_mut() {
                    if let Some(mut q) = kademlia.query_mut(&id) {
                        q.finish();
                    }
                }
                return;
            }
        }
    }

    fn remember(&mut self, peer_id: PeerId, addrs: impl Iterator<Item = Multiaddr>) {
        let known = self.address_book.entry(peer_id).or_default();
        for addr in addrs {
            if known.len() >= MAX_ADDRS_PER_PEER {
                break;
            }
            known.insert(addr);
        }
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    fn handle_command(&mut self, command: HostCommand) {
        match command {
            HostCommand::Dial { addr, reply } => {
                let result = self.swarm.dial(addr.clone()).map_err(|e| NodeError::Dial {
                    address: addr.to_string(),
                    reason: e.to_string(),
                });
                let _ = reply.send(result);
            }
            HostCommand::DialPeer(peer) => {
                if self.swarm.is_connected(&peer.peer_id) {
                    return;
                }
                // Providers often come back without addresses; the routing
                // table may still know some.
                let opts = DialOpts::peer_id(peer.peer_id)
                    .addresses(peer.addrs)
                    .extend_addresses_through_behaviour()
                    .condition(PeerCondition::DisconnectedAndNotDialing)
                    .build();
                if let Err(e) = self.swarm.dial(opts) {
                    debug!(peer = %peer.peer_id, error = %e, "Dial to discovered peer failed");
                }
            }
            HostCommand::ConnectedPeers { reply } => {
                let _ = reply.send(self.swarm.connected_peers().copied().collect());
            }
            HostCommand::ListenAddrs { reply } => {
                let _ = reply.send(self.swarm.listeners().cloned().collect());
            }
            HostCommand::ExternalAddrs { reply } => {
                let _ = reply.send(self.swarm.external_addresses().cloned().collect());
            }
            HostCommand::Routing(command) => self.handle_routing_command(command),
            HostCommand::PubSub(command) => self.handle_pubsub_command(command),
        }
    }

    fn handle_routing_command(&mut self, command: RoutingCommand) {
        let routing_open = self.routing_open;
        let Some(kademlia) = self
            .swarm
            .behaviour_mut()
            .kademlia
            .as_mut()
            .filter(|_| routing_open)
        else {
            let unavailable = || NodeError::RoutingTableUnavailable("routing table closed".into());
            match command {
                RoutingCommand::StartProviding { reply, .. } => {
                    let _ = reply.send(Err(unavailable()));
                }
                RoutingCommand::PeerCount { reply } => {
                    let _ = reply.send(0);
                }
                // Dropping `results` ends the stream immediately.
                _ => {}
            }
            return;
        };

        match command {
            RoutingCommand::StartProviding { key, reply } => match kademlia.start_providing(key) {
                Ok(id) => {
                    self.pending_provide.insert(id, reply);
                }
                Err(e) => {
                    let _ = reply.send(Err(NodeError::Query(e.to_string())));
                }
            },
            RoutingCommand::GetProviders { key, results } => {
                let id = kademlia.get_providers(key);
                self.pending_providers.insert(
                    id,
                    ProviderQuery {
                        results,
                        seen: HashSet::new(),
                    },
                );
            }
            RoutingCommand::Bootstrap => match kademlia.bootstrap() {
                Ok(_) => debug!("Bootstrap started"),
                Err(_) => debug!("Bootstrap skipped: no known peers"),
            },
            RoutingCommand::AddAddress { peer, addr } => {
                kademlia.add_address(&peer, addr);
            }
            RoutingCommand::PeerCount { reply } => {
                let count: usize = kademlia.kbuckets().map(|b| b.num_entries()).sum();
                let _ = reply.send(count);
            }
            RoutingCommand::Close => {
                self.routing_open = false;
                self.fail_pending_queries();
                info!("Routing table closed");
            }
        }
    }

    fn handle_pubsub_command(&mut self, command: PubSubCommand) {
        let pubsub_open = self.pubsub_open;
        let Some(gossipsub) = self
            .swarm
            .behaviour_mut()
            .gossipsub
            .as_mut()
            .filter(|_| pubsub_open)
        else {
            let closed = || NodeError::Topic("pub/sub router closed".into());
            match command {
                PubSubCommand::Subscribe { reply, .. } => {
                    let _ = reply.send(Err(closed()));
                }
                PubSubCommand::Unsubscribe { reply, .. } => {
                    let _ = reply.send(false);
                }
                PubSubCommand::Publish { reply, .. } => {
                    let _ = reply.send(Err(closed()));
                }
                PubSubCommand::AddExplicitPeer(_) | PubSubCommand::Close => {}
            }
            return;
        };

        match command {
            PubSubCommand::Subscribe { topic, reply } => {
                let ident = IdentTopic::new(topic.clone());
                let result = gossipsub
                    .subscribe(&ident)
                    .map_err(|e| NodeError::Topic(e.to_string()));
                if matches!(result, Ok(true)) {
                    // Peers that announced the topic before we joined.
                    let hash = ident.hash();
                    let members: Vec<PeerId> = gossipsub
                        .all_peers()
                        .filter(|(_, topics)| topics.contains(&&hash))
                        .map(|(peer, _)| *peer)
                        .collect();
                    for peer in members {
                        self.connections.topic_shared(peer, &topic);
                    }
                    self.topics.insert(topic);
                }
                let _ = reply.send(result);
            }
            PubSubCommand::Unsubscribe { topic, reply } => {
                let _ = gossipsub.unsubscribe(&IdentTopic::new(topic.clone()));
                self.connections.forget_topic(&topic);
                let _ = reply.send(self.topics.remove(&topic));
            }
            PubSubCommand::Publish { topic, data, reply } => {
                let result = gossipsub
                    .publish(IdentTopic::new(topic), data)
                    .map_err(|e| NodeError::Publish(e.to_string()));
                let _ = reply.send(result);
            }
            PubSubCommand::AddExplicitPeer(peer) => gossipsub.add_explicit_peer(&peer),
            PubSubCommand::Close => {
                for topic in self.topics.drain() {
                    let _ = gossipsub.unsubscribe(&IdentTopic::new(topic.clone()));
                    self.connections.forget_topic(&topic);
                }
                self.pubsub_open = false;
                info!("Pub/sub router closed");
            }
        }
    }

    // =========================================================================
    // RELAY
    // =========================================================================

    /// Open a circuit listener on a relay if we are private and hold none.
    fn reserve_relay(&mut self) {
        let Some((relay, circuit)) = self.auto_relay.next_circuit(self.reachability.current())
        else {
            return;
        };
        match self.swarm.listen_on(circuit.clone()) {
            Ok(listener) => {
                info!(%relay, %circuit, "Requesting relay reservation");
                self.auto_relay.reserved(relay, listener);
            }
            Err(e) => {
                debug!(%relay, error = %e, "Relay listen failed");
                self.auto_relay.remove_candidate(&relay);
            }
        }
    }

    fn release_relay(&mut self) {
        if let Some(listener) = self.auto_relay.release() {
            info!("Publicly reachable, dropping relay reservation");
            self.swarm.remove_listener(listener);
        }
    }

    // =========================================================================
    // CONNECTION MANAGER
    // =========================================================================

    async fn trim_connections(&mut self) {
        for peer_id in self.connections.trim(Instant::now()) {
            info!(peer = %peer_id, "Pruning connection");
            let _ = self.swarm.disconnect_peer_id(peer_id);
            self.events
                .publish(NetworkEvent::ConnectionPruned(peer_id))
                .await;
        }
    }

    fn fail_pending_queries(&mut self) {
        for (_, reply) in self.pending_provide.drain() {
            let _ = reply.send(Err(NodeError::RoutingTableUnavailable(
                "routing table closed".into(),
            )));
        }
        self.pending_providers.clear();
    }
}
