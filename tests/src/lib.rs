//! # Overlay Test Suite
//!
//! Unified test crate for behaviour that needs more than one node.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── fixtures.rs    # Keys, loopback configs, address helpers
//!     ├── lifecycle.rs   # Construction failures and resource release
//!     ├── discovery.rs   # Advertise / find across a seed node
//!     └── gossip.rs      # Topic mesh and message delivery
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p overlay-tests
//!
//! # By category
//! cargo test -p overlay-tests integration::discovery::
//!
//! # Benchmarks
//! cargo bench -p overlay-tests
//! ```
//!
//! Tests bind loopback sockets only. Hosts without an IPv6 loopback skip the
//! tests that need a full listener set.

#![allow(dead_code)]

pub mod integration;
