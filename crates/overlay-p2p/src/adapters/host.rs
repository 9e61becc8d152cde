//! Host handle and lifecycle.
//!
//! The swarm is owned by a single driver task once the host starts. Every
//! other component talks to it through a cloneable [`HostHandle`] that sends
//! [`HostCommand`]s over an unbounded channel. The channel exists before the
//! swarm does, so commands sent during construction are queued and served
//! when the driver starts.

use libp2p::core::transport::ListenerId;
use libp2p::gossipsub::{self, MessageId};
use libp2p::kad::RecordKey;
use libp2p::swarm::behaviour::toggle::Toggle;
use libp2p::{Multiaddr, PeerId, Swarm};
use shared_bus::EventPublisher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::behaviour::OverlayBehaviour;
use super::driver::SwarmDriver;
use crate::domain::{ConnectionPolicy, ListenAddressSet, NodeError, PeerInfo};

/// How long [`RunningHost::close`] waits for the driver before aborting it.
const DRIVER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Requests served by the swarm driver.
#[derive(Debug)]
pub enum HostCommand {
    /// Start dialing an address. Replies once the dial was started.
    Dial {
        addr: Multiaddr,
        reply: oneshot::Sender<Result<(), NodeError>>,
    },
    /// Dial a discovered peer unless already connected or dialing.
    DialPeer(PeerInfo),
    ConnectedPeers {
        reply: oneshot::Sender<Vec<PeerId>>,
    },
    ListenAddrs {
        reply: oneshot::Sender<Vec<Multiaddr>>,
    },
    ExternalAddrs {
        reply: oneshot::Sender<Vec<Multiaddr>>,
    },
    Routing(RoutingCommand),
    PubSub(PubSubCommand),
}

/// Requests for the routing behaviour.
#[derive(Debug)]
pub enum RoutingCommand {
    StartProviding {
        key: RecordKey,
        reply: oneshot::Sender<Result<(), NodeError>>,
    },
    GetProviders {
        key: RecordKey,
        results: mpsc::UnboundedSender<PeerInfo>,
    },
    Bootstrap,
    AddAddress {
        peer: PeerId,
        addr: Multiaddr,
    },
    PeerCount {
        reply: oneshot::Sender<usize>,
    },
    Close,
}

/// Requests for the pub/sub behaviour.
#[derive(Debug)]
pub enum PubSubCommand {
    Subscribe {
        topic: String,
        reply: oneshot::Sender<Result<bool, NodeError>>,
    },
    Unsubscribe {
        topic: String,
        reply: oneshot::Sender<bool>,
    },
    Publish {
        topic: String,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<MessageId, NodeError>>,
    },
    AddExplicitPeer(PeerId),
    Close,
}

/// Cloneable command handle to the host.
#[derive(Debug, Clone)]
pub struct HostHandle {
    peer_id: PeerId,
    commands: mpsc::UnboundedSender<HostCommand>,
}

impl HostHandle {
    pub(crate) fn channel(peer_id: PeerId) -> (Self, mpsc::UnboundedReceiver<HostCommand>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        (Self { peer_id, commands }, receiver)
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Whether the driver is gone (or was never started and its queue dropped).
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Queue a command without waiting for a reply.
    pub fn send(&self, command: HostCommand) -> Result<(), NodeError> {
        self.commands
            .send(command)
            .map_err(|_| NodeError::HostClosed)
    }

    /// Queue a command and wait for its reply.
    pub async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> HostCommand,
    ) -> Result<T, NodeError> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply))?;
        response.await.map_err(|_| NodeError::HostClosed)
    }

    pub async fn dial(&self, addr: Multiaddr) -> Result<(), NodeError> {
        self.request(|reply| HostCommand::Dial { addr, reply })
            .await?
    }

    /// Fire-and-forget dial of a discovered peer.
    pub fn dial_peer(&self, peer: PeerInfo) -> Result<(), NodeError> {
        self.send(HostCommand::DialPeer(peer))
    }

    pub async fn connected_peers(&self) -> Result<Vec<PeerId>, NodeError> {
        self.request(|reply| HostCommand::ConnectedPeers { reply })
            .await
    }

    /// Addresses the listeners are actually bound to.
    pub async fn listen_addrs(&self) -> Result<Vec<Multiaddr>, NodeError> {
        self.request(|reply| HostCommand::ListenAddrs { reply })
            .await
    }

    /// Addresses confirmed reachable from outside.
    pub async fn external_addrs(&self) -> Result<Vec<Multiaddr>, NodeError> {
        self.request(|reply| HostCommand::ExternalAddrs { reply })
            .await
    }
}

/// A built host that has not started yet.
///
/// Listeners are open, but nothing is polled: no connection is accepted and
/// no event is emitted until [`start`](Self::start).
pub struct PendingHost {
    swarm: Swarm<OverlayBehaviour>,
    handle: HostHandle,
    commands: mpsc::UnboundedReceiver<HostCommand>,
    listeners: Vec<ListenerId>,
    addresses: ListenAddressSet,
    policy: ConnectionPolicy,
    prune_interval: Duration,
}

impl PendingHost {
    pub(crate) fn new(
        swarm: Swarm<OverlayBehaviour>,
        handle: HostHandle,
        commands: mpsc::UnboundedReceiver<HostCommand>,
        listeners: Vec<ListenerId>,
        addresses: ListenAddressSet,
        policy: ConnectionPolicy,
        prune_interval: Duration,
    ) -> Self {
        Self {
            swarm,
            handle,
            commands,
            listeners,
            addresses,
            policy,
            prune_interval,
        }
    }

    pub fn handle(&self) -> &HostHandle {
        &self.handle
    }

    pub fn peer_id(&self) -> PeerId {
        *self.swarm.local_peer_id()
    }

    pub fn listen_addresses(&self) -> &ListenAddressSet {
        &self.addresses
    }

    pub fn has_routing(&self) -> bool {
        self.swarm.behaviour().kademlia.is_enabled()
    }

    pub fn has_pubsub(&self) -> bool {
        self.swarm.behaviour().gossipsub.is_enabled()
    }

    /// Fill the pub/sub slot. Only possible before the host starts, so no
    /// connection handler exists yet for the disabled slot.
    pub(crate) fn install_pubsub(&mut self, behaviour: gossipsub::Behaviour) {
        self.swarm.behaviour_mut().gossipsub = Toggle::from(Some(behaviour));
    }

    /// Hand the swarm to a driver task.
    pub fn start(self, events: Arc<dyn EventPublisher>) -> RunningHost {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let driver = SwarmDriver::new(
            self.swarm,
            self.commands,
            shutdown_rx,
            events,
            self.policy,
            self.prune_interval,
        );
        let task = tokio::spawn(driver.run());

        RunningHost {
            handle: self.handle,
            shutdown,
            task: Some(task),
        }
    }

    /// Close every listener and drop the swarm without starting it.
    pub fn close(mut self) {
        for id in self.listeners.drain(..) {
            self.swarm.remove_listener(id);
        }
        debug!(peer = %self.handle.peer_id, "Pending host released");
    }
}

/// A host whose driver task is running.
pub struct RunningHost {
    handle: HostHandle,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl RunningHost {
    pub fn handle(&self) -> &HostHandle {
        &self.handle
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the driver and wait for it to drop the swarm (closing listeners
    /// and connections). Returns false if already closed.
    pub async fn close(&mut self) -> bool {
        let Some(mut task) = self.task.take() else {
            return false;
        };

        let _ = self.shutdown.send(true);
        match tokio::time::timeout(DRIVER_STOP_TIMEOUT, &mut task).await {
            Ok(Ok(())) => info!(peer = %self.handle.peer_id, "Host closed"),
            Ok(Err(e)) => warn!(error = %e, "Swarm driver ended abnormally"),
            Err(_) => {
                warn!("Swarm driver did not stop in time, aborting");
                task.abort();
            }
        }
        true
    }
}

impl Drop for RunningHost {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
