//! # Overlay Node Runtime Library
//!
//! This library exposes the pieces of the node binary for testing.
//! The main entry point is the `main.rs` binary.

pub mod identity_store;
pub mod runtime;

pub use identity_store::load_or_generate;
pub use runtime::{OverlayRuntime, RuntimeSettings};
