//! # Connection Policy
//!
//! Watermark-based connection trimming with score-based victim selection.
//!
//! ## Design
//!
//! - **At or below the low watermark**: nothing is pruned, pending marks are dropped
//! - **Above the high watermark**: the lowest-scoring unprotected peers are
//!   marked until the unmarked count reaches the low watermark
//! - **Grace period**: a marked peer is closed only once its mark is older
//!   than the grace period, and only while the node is still above low

// Semantic submodules
mod config;
mod manager;
mod security;
mod types;

// Re-export public API
pub use config::ConnectionPolicy;
pub use manager::ConnectionManager;
pub use security::ConnectionInfo;
pub use types::ConnectionStats;
