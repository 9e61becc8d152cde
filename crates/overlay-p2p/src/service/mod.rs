//! Service Layer - Node orchestration
//!
//! Wires the domain and adapters together in dependency order and owns the
//! resulting subsystems until shutdown.

mod node;


pub use node::{Node, NodeBuilder, ShutdownStage};
