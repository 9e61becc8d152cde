//! Multi-node integration tests.

pub mod fixtures;

mod discovery;
mod gossip;
mod lifecycle;
