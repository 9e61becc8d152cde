//! Connection policy types.

/// Connection statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Peers with at least one open connection.
    pub connected: usize,
    /// Peers marked for closure, waiting out the grace period.
    pub marked: usize,
    /// Peers exempt from trimming.
    pub protected: usize,
    pub low_watermark: usize,
    pub high_watermark: usize,
}
