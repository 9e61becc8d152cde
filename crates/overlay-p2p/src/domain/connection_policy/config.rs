//! Connection policy bounds.

use std::time::Duration;

use crate::domain::errors::NodeError;

/// Default low watermark.
pub const DEFAULT_LOW_WATERMARK: usize = 100;
/// Default high watermark.
pub const DEFAULT_HIGH_WATERMARK: usize = 400;
/// Default grace period before a marked connection is closed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Validated connection watermarks. `low < high` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionPolicy {
    low_watermark: usize,
    high_watermark: usize,
    grace_period: Duration,
}

impl ConnectionPolicy {
    /// Validate and build a policy. Performs no I/O.
    pub fn new(low: usize, high: usize, grace_period: Duration) -> Result<Self, NodeError> {
        if low >= high {
            return Err(NodeError::InvalidPolicyBounds { low, high });
        }
        Ok(Self {
            low_watermark: low,
            high_watermark: high,
            grace_period,
        })
    }

    pub fn low_watermark(&self) -> usize {
        self.low_watermark
    }

    pub fn high_watermark(&self) -> usize {
        self.high_watermark
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Testing policy with small limits
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self {
            low_watermark: 2,
            high_watermark: 4,
            grace_period: Duration::from_secs(10),
        }
    }
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            low_watermark: DEFAULT_LOW_WATERMARK,
            high_watermark: DEFAULT_HIGH_WATERMARK,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}
