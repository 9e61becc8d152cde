//! Domain errors for node construction and operation.

use thiserror::Error;

/// Orchestration step a [`NodeError`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Identity,
    ConnectionPolicy,
    Transport,
    RoutingTable,
    Reachability,
    PubSub,
    Runtime,
}

/// Errors that can occur while building or running a node.
///
/// Construction errors are returned before any resource outlives the failed
/// call: whatever was acquired before the failing step has been released.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// The private key blob could not be decoded.
    #[error("invalid private key encoding: {0}")]
    InvalidKeyEncoding(String),

    /// Connection policy watermarks are not ordered.
    #[error("invalid connection policy: low watermark {low} must be below high watermark {high}")]
    InvalidPolicyBounds { low: usize, high: usize },

    /// The transport stack could not be assembled.
    #[error("transport initialisation failed: {0}")]
    TransportInit(String),

    /// A listener could not be opened.
    #[error("failed to listen on {address}: {reason}")]
    TransportBindFailed { address: String, reason: String },

    /// The routing table could not be created, or is gone.
    #[error("routing table unavailable: {0}")]
    RoutingTableUnavailable(String),

    /// The gossip engine could not be created.
    #[error("pub/sub initialisation failed: {0}")]
    PubSubInitFailed(String),

    /// The event bus is closed.
    #[error("event bus unavailable")]
    EventBusUnavailable,

    /// The swarm driver has stopped.
    #[error("host is closed")]
    HostClosed,

    /// Dialing a peer failed.
    #[error("failed to dial {address}: {reason}")]
    Dial { address: String, reason: String },

    /// Joining or leaving a gossip topic failed.
    #[error("topic operation failed: {0}")]
    Topic(String),

    /// Publishing a gossip message failed.
    #[error("publish failed: {0}")]
    Publish(String),

    /// A routing query failed.
    #[error("routing query failed: {0}")]
    Query(String),
}

impl NodeError {
    /// The orchestration step this error is attributed to.
    pub fn step(&self) -> Step {
        match self {
            Self::InvalidKeyEncoding(_) => Step::Identity,
            Self::InvalidPolicyBounds { .. } => Step::ConnectionPolicy,
            Self::TransportInit(_) | Self::TransportBindFailed { .. } => Step::Transport,
            Self::RoutingTableUnavailable(_) | Self::Query(_) => Step::RoutingTable,
            Self::EventBusUnavailable => Step::Reachability,
            Self::PubSubInitFailed(_) | Self::Topic(_) | Self::Publish(_) => Step::PubSub,
            Self::HostClosed | Self::Dial { .. } => Step::Runtime,
        }
    }
}
