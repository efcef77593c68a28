//! # SMQ Runtime
//!
//! Simple message queue on top of a Redis-compatible key-value store.
//!
//! This library provides:
//! - Named queues with per-queue visibility timeout, delay and size limit
//! - At-least-once delivery with visibility timeouts and receive counts
//! - Atomic send, receive, delete and visibility changes, each one a single
//!   server-side script
//! - An in-memory store with a controllable clock for tests
//! - A worker that polls a queue and dispatches messages to a handler
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Queue names, message ids and message records
//! - [`queue`] - Queue settings and attribute records
//! - [`config`] - Client and store configuration
//! - [`store`] - Backing store abstraction and script primitives
//! - [`stores`] - Redis and in-memory store adapters
//! - [`registry`] - Queue lifecycle and attributes
//! - [`message_store`] - Per-queue message state transitions
//! - [`client`] - Client trait and implementation
//! - [`worker`] - Polling consumer

// Module declarations
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod keys;
pub mod message;
pub mod message_store;
pub mod queue;
pub mod registry;
pub mod scripts;
pub mod store;
pub mod stores;
pub mod worker;

// Re-export commonly used types at crate root for convenience
pub use client::{receive_with_wait, QueueClient, QueueClientFactory, StandardQueueClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ClientConfig, RedisConfig, StoreConfig};
pub use error::{ConfigurationError, QueueError, StoreError, ValidationError};
pub use message::{Message, MessageId, Namespace, QueueName, ReceivedMessage, Timestamp};
pub use queue::{QueueAttributes, QueueSettings, QueueSettingsUpdate};
pub use store::{Store, StoreKind};
pub use stores::{InMemoryStore, RedisStore};
pub use worker::{
    HandlerError, HandlerOutcome, MessageHandler, Worker, WorkerConfig, WorkerHandle, WorkerStats,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
