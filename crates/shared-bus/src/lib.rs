//! # Shared Bus - In-Process Event Bus for Node Notifications
//!
//! Carries the asynchronous notifications an overlay node emits while it
//! runs: reachability transitions, connection lifecycle, confirmed addresses
//! and received gossip messages.
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │ Swarm driver │                    │ Reachability │
//! │              │    publish()       │   monitor    │
//! │              │ ──────┐            │              │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐          │
//!                  │  Event Bus   │          │
//!                  │              │ ─────────┘
//!                  └──────────────┘  subscribe()
//! ```
//!
//! Delivery is best-effort: a subscriber that falls behind by more than the
//! channel capacity skips the oldest events. Closing the bus ends every open
//! subscription and makes further `try_subscribe` calls fail.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod events;
pub mod publisher;
pub mod subscriber;

// Re-export main types
pub use events::{EventFilter, EventSource, EventTopic, NetworkEvent, Reachability};
pub use publisher::{EventPublisher, InMemoryEventBus};
pub use subscriber::{EventStream, EventSubscriber, Subscription, SubscriptionError};

/// Maximum events to buffer per subscriber before the oldest are dropped.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
