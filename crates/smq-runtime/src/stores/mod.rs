//! Store implementations.
//!
//! This module contains concrete implementations of the [`Store`](crate::store::Store)
//! trait for the supported backends.

pub mod memory;
pub mod redis;

pub use memory::InMemoryStore;
pub use self::redis::RedisStore;
