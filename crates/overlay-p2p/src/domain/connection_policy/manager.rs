//! Connection manager implementation.

use libp2p::PeerId;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

use super::config::ConnectionPolicy;
use super::security::ConnectionInfo;
use super::types::ConnectionStats;

/// Tracks connected peers and decides which to close.
///
/// Connections are counted per peer: several transport connections to the
/// same peer occupy one slot.
#[derive(Debug)]
pub struct ConnectionManager {
    /// All connected peers
    connections: HashMap<PeerId, ConnectionInfo>,
    /// Peers protected explicitly, before or after they connected
    protected: HashSet<PeerId>,
    /// Joined gossip topics each peer is also subscribed to
    shared_topics: HashMap<PeerId, HashSet<String>>,
    policy: ConnectionPolicy,
}

impl ConnectionManager {
    pub fn new(policy: ConnectionPolicy) -> Self {
        Self {
            connections: HashMap::new(),
            protected: HashSet::new(),
            shared_topics: HashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &ConnectionPolicy {
        &self.policy
    }

    /// Record a newly connected peer. Returns false if it was already tracked.
    pub fn connected(&mut self, peer_id: PeerId, now: Instant) -> bool {
        if self.connections.contains_key(&peer_id) {
            return false;
        }
        let mut info = ConnectionInfo::new(peer_id, now);
        info.protected = self.is_protected(&peer_id);
        self.connections.insert(peer_id, info);
        true
    }

    /// Forget a peer whose last connection closed.
    ///
    /// Topic memberships end with the connection; explicit protection stays.
    pub fn disconnected(&mut self, peer_id: &PeerId) -> Option<ConnectionInfo> {
        self.shared_topics.remove(peer_id);
        self.connections.remove(peer_id)
    }

    /// Overwrite a peer's score
    pub fn set_score(&mut self, peer_id: &PeerId, score: f64) {
        if let Some(conn) = self.connections.get_mut(peer_id) {
            conn.score = score;
        }
    }

    /// Add `delta` to a peer's score
    pub fn adjust_score(&mut self, peer_id: &PeerId, delta: f64) {
        if let Some(conn) = self.connections.get_mut(peer_id) {
            conn.score += delta;
        }
    }

    /// Exempt a peer from trimming. Applies to future connections as well.
    pub fn protect(&mut self, peer_id: PeerId) {
        self.protected.insert(peer_id);
        self.refresh_protection(&peer_id);
    }

    /// Drop explicit protection. A peer sharing a topic stays protected.
    pub fn unprotect(&mut self, peer_id: &PeerId) {
        self.protected.remove(peer_id);
        self.refresh_protection(peer_id);
    }

    /// A connected peer is subscribed to a topic we joined.
    ///
    /// Peers sharing at least one topic are exempt from trimming.
    pub fn topic_shared(&mut self, peer_id: PeerId, topic: &str) {
        if !self.connections.contains_key(&peer_id) {
            return;
        }
        self.shared_topics
            .entry(peer_id)
            .or_default()
            .insert(topic.to_string());
        self.refresh_protection(&peer_id);
    }

    /// A peer left a topic, or we did.
    pub fn topic_unshared(&mut self, peer_id: &PeerId, topic: &str) {
        let Some(topics) = self.shared_topics.get_mut(peer_id) else {
            return;
        };
        topics.remove(topic);
        if topics.is_empty() {
            self.shared_topics.remove(peer_id);
        }
        self.refresh_protection(peer_id);
    }

    /// We left `topic`: no peer shares it any more.
    pub fn forget_topic(&mut self, topic: &str) {
        let peers: Vec<PeerId> = self
            .shared_topics
            .iter()
            .filter(|(_, topics)| topics.contains(topic))
            .map(|(peer, _)| *peer)
            .collect();
        for peer in peers {
            self.topic_unshared(&peer, topic);
        }
    }

    pub fn is_protected(&self, peer_id: &PeerId) -> bool {
        self.protected.contains(peer_id) || self.shared_topics.contains_key(peer_id)
    }

    fn refresh_protection(&mut self, peer_id: &PeerId) {
        let protected = self.is_protected(peer_id);
        if let Some(conn) = self.connections.get_mut(peer_id) {
            conn.protected = protected;
            if protected {
                conn.marked_at = None;
            }
        }
    }

    /// Run one trimming round and return the peers to close.
    ///
    /// Returned peers are no longer tracked.
    pub fn trim(&mut self, now: Instant) -> Vec<PeerId> {
        let count = self.connections.len();
        let low = self.policy.low_watermark();

        if count <= low {
            for conn in self.connections.values_mut() {
                conn.marked_at = None;
            }
            return Vec::new();
        }

        if count > self.policy.high_watermark() {
            self.mark_victims(count - low, now);
        }

        let grace = self.policy.grace_period();
        let mut expired: Vec<&ConnectionInfo> = self
            .connections
            .values()
            .filter(|c| {
                c.marked_at
                    .is_some_and(|at| now.saturating_duration_since(at) >= grace)
            })
            .collect();

        // Oldest marks first, then lowest score
        expired.sort_by(|a, b| {
            a.marked_at.cmp(&b.marked_at).then(
                a.eviction_score(now)
                    .partial_cmp(&b.eviction_score(now))
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });

        let victims: Vec<PeerId> = expired
            .into_iter()
            .take(count - low)
            .map(|c| c.peer_id)
            .collect();

        for peer_id in &victims {
            self.connections.remove(peer_id);
        }
        victims
    }

    /// Mark the lowest-scoring unprotected peers until `target` are marked.
    fn mark_victims(&mut self, target: usize, now: Instant) {
        let already = self.connections.values().filter(|c| c.is_marked()).count();
        if already >= target {
            return;
        }

        let mut candidates: Vec<_> = self
            .connections
            .values()
            .filter(|c| !c.protected && !c.is_marked())
            .map(|c| (c.peer_id, c.eviction_score(now)))
            .collect();

        candidates.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        for (peer_id, _) in candidates.into_iter().take(target - already) {
            if let Some(conn) = self.connections.get_mut(&peer_id) {
                conn.marked_at = Some(now);
            }
        }
    }

    /// Get connection info for a peer
    pub fn get(&self, peer_id: &PeerId) -> Option<&ConnectionInfo> {
        self.connections.get(peer_id)
    }

    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.connections.contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            connected: self.connections.len(),
            marked: self.connections.values().filter(|c| c.is_marked()).count(),
            protected: self.connections.values().filter(|c| c.protected).count(),
            low_watermark: self.policy.low_watermark(),
            high_watermark: self.policy.high_watermark(),
        }
    }
}
