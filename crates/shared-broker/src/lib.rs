//! # Shared Broker - Queue and Pub/Sub Capability Contract
//!
//! Courier never talks to its peers directly. Callers and servers only share
//! a broker that offers two primitives:
//!
//! - **Named lists** used as FIFO queues (push to tail, blocking pop from head,
//!   atomic remove-by-value)
//! - **Named channels** with publish/subscribe fan-out
//!
//! ```text
//! ┌──────────────┐   push(courier.rpc.X)    ┌──────────────┐
//! │  RPC Client  │ ───────────────────────→ │              │
//! │              │                          │    Broker    │
//! │              │ ←─────────────────────── │              │
//! └──────────────┘ subscribe(courier.reply) └──────────────┘
//!                                              ↑       │
//!                            publish(reply)    │       │ pop_blocking
//!                                          ┌───┴───────▼──┐
//!                                          │  RPC Server  │
//!                                          └──────────────┘
//! ```
//!
//! Every client and server opens its own pair of connections (publish,
//! subscribe) through [`Broker::connect`]. Quitting a connection wakes any
//! blocked pop or subscription on it.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod connection;
pub mod memory;
pub mod subscriber;

// Re-export main types
pub use connection::{Broker, BrokerConnection, BrokerError};
pub use memory::{InMemoryBroker, InMemoryConnection};
pub use subscriber::Subscription;

/// Messages buffered per channel before slow subscribers start lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
