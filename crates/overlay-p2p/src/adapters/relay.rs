//! Automatic relay reservations.
//!
//! While AutoNAT reports us as privately reachable, the driver keeps one
//! circuit listener open on a connected peer that offers the relay hop
//! protocol. Remote peers can then reach us through
//! `<relay addr>/p2p/<relay>/p2p-circuit/p2p/<us>`. The listener is removed
//! once we become publicly reachable again.
//!
//! This type only holds the selection state; the driver owns the swarm and
//! opens or closes the listeners it asks for.

use libp2p::core::transport::ListenerId;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId, StreamProtocol};
use shared_bus::Reachability;
use std::collections::BTreeMap;

/// Protocol a peer lists in identify when it accepts relay reservations.
pub(crate) const HOP_PROTOCOL: StreamProtocol =
    StreamProtocol::new("/libp2p/circuit/relay/0.2.0/hop");

#[derive(Debug)]
pub(crate) struct AutoRelay {
    enabled: bool,
    /// Connected relay peers and the address to reach each through.
    candidates: BTreeMap<PeerId, Multiaddr>,
    /// Relay currently holding our reservation.
    active: Option<(PeerId, ListenerId)>,
}

impl AutoRelay {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            candidates: BTreeMap::new(),
            active: None,
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Remember a relay peer. Circuit addresses are never used as relay
    /// addresses. Returns true if the peer was not known before.
    pub(crate) fn add_candidate<'a>(
        &mut self,
        peer: PeerId,
        addrs: impl IntoIterator<Item = &'a Multiaddr>,
    ) -> bool {
        if !self.enabled || self.candidates.contains_key(&peer) {
            return false;
        }
        let Some(addr) = addrs
            .into_iter()
            .find(|a| !a.iter().any(|p| matches!(p, Protocol::P2pCircuit)))
        else {
            return false;
        };
        let mut addr = addr.clone();
        if matches!(addr.iter().last(), Some(Protocol::P2p(_))) {
            addr.pop();
        }
        self.candidates.insert(peer, addr);
        true
    }

    /// Forget a relay peer. Returns its listener if it held our reservation.
    pub(crate) fn remove_candidate(&mut self, peer: &PeerId) -> Option<ListenerId> {
        self.candidates.remove(peer);
        match self.active {
            Some((relay, listener)) if relay == *peer => {
                self.active = None;
                Some(listener)
            }
            _ => None,
        }
    }

    /// The circuit to listen on, if we are private and hold no reservation.
    pub(crate) fn next_circuit(&self, reachability: Reachability) -> Option<(PeerId, Multiaddr)> {
        if !self.enabled || reachability != Reachability::Private || self.active.is_some() {
            return None;
        }
        let (relay, addr) = self.candidates.iter().next()?;
        let circuit = addr
            .clone()
            .with(Protocol::P2p(*relay))
            .with(Protocol::P2pCircuit);
        Some((*relay, circuit))
    }

    pub(crate) fn reserved(&mut self, relay: PeerId, listener: ListenerId) {
        self.active = Some((relay, listener));
    }

    pub(crate) fn active_relay(&self) -> Option<PeerId> {
        self.active.map(|(relay, _)| relay)
    }

    /// A listener closed. If it was our reservation the relay is dropped
    /// from the candidates so the next attempt picks another one.
    pub(crate) fn listener_closed(&mut self, listener: ListenerId) -> bool {
        match self.active {
            Some((relay, id)) if id == listener => {
                self.active = None;
                self.candidates.remove(&relay);
                true
            }
            _ => false,
        }
    }

    /// Give up the reservation. Candidates are kept.
    pub(crate) fn release(&mut self) -> Option<ListenerId> {
        self.active.take().map(|(_, listener)| listener)
    }
}
