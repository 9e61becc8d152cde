//! Domain Layer - Pure logic with no I/O
//!
//! This module contains:
//! - Node identity (key decoding, peer id derivation)
//! - Listen address derivation
//! - Connection policy and watermark trimming
//! - Errors and value objects shared by the adapters

pub mod connection_policy;
pub mod errors;
pub mod identity;
pub mod listen_addrs;
pub mod value_objects;

pub use connection_policy::*;
pub use errors::{NodeError, Step};
pub use identity::NodeIdentity;
pub use listen_addrs::{AddressFamily, ListenAddress, ListenAddressSet, TransportKind};
pub use value_objects::{namespace_key, split_peer_addr, PeerInfo, PROTOCOL};

pub use shared_bus::Reachability;
