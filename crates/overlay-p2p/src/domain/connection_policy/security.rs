//! Per-connection bookkeeping and victim ordering.

use libp2p::PeerId;
use std::time::Instant;

/// Information about a connected peer.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub peer_id: PeerId,
    /// When the first connection was established
    pub connected_at: Instant,
    /// Accumulated score; higher peers are kept longer
    pub score: f64,
    /// Exempt from trimming
    pub protected: bool,
    /// When this peer was selected for closure
    pub marked_at: Option<Instant>,
}

impl ConnectionInfo {
    pub fn new(peer_id: PeerId, now: Instant) -> Self {
        Self {
            peer_id,
            connected_at: now,
            score: 0.0,
            protected: false,
            marked_at: None,
        }
    }

    /// Calculate uptime in seconds
    pub fn uptime_secs(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.connected_at).as_secs()
    }

    /// Calculate eviction score (lower = more likely to be trimmed)
    pub fn eviction_score(&self, now: Instant) -> f64 {
        let uptime_minutes = self.uptime_secs(now) as f64 / 60.0;
        self.score + (uptime_minutes * 0.1)
    }

    pub fn is_marked(&self) -> bool {
        self.marked_at.is_some()
    }
}
