//! Backing store capability consumed by the queue engine.
//!
//! The queue engine never reads and then writes across two round trips. Every
//! mutation is a [`Script`]: one atomic unit executed by the store. A script
//! carries two renditions of the same logic:
//!
//! - a Lua body, run by Redis through `EVALSHA`
//! - a native function, run by the in-memory store under its lock against a
//!   [`ScriptContext`]
//!
//! Both renditions reply with a [`ScriptValue`] of the same shape.
//!
//! Scripts check their inputs before the first write. A script that still
//! fails part way, such as an `HINCRBY` on a corrupted field, keeps its
//! earlier writes on Redis; the in-memory store restores the keys it was given.

use crate::error::StoreError;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

/// Lower bound for score ranges (Redis `-inf`)
pub const SCORE_MIN: i64 = i64::MIN;

/// Upper bound for score ranges (Redis `+inf`)
pub const SCORE_MAX: i64 = i64::MAX;

/// Kinds of backing store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Redis,
    InMemory,
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Redis => write!(f, "redis"),
            Self::InMemory => write!(f, "in_memory"),
        }
    }
}

/// Interface implemented by specific backing stores (Redis, in-memory)
#[async_trait]
pub trait Store: Send + Sync {
    /// Execute a script atomically with respect to every other store operation
    async fn eval(
        &self,
        script: &Script,
        keys: &[String],
        args: &[Bytes],
    ) -> Result<ScriptValue, StoreError>;

    /// Members of a set, in no particular order
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Check connectivity
    async fn ping(&self) -> Result<(), StoreError>;

    /// Get store kind
    fn kind(&self) -> StoreKind;
}

/// Native rendition of a script
pub type NativeScript =
    fn(&mut dyn ScriptContext, &[String], &[Bytes]) -> Result<ScriptValue, StoreError>;

/// A named atomic unit of store logic
pub struct Script {
    name: &'static str,
    lua: &'static str,
    native: NativeScript,
}

impl Script {
    pub const fn new(name: &'static str, lua: &'static str, native: NativeScript) -> Self {
        Self { name, lua, native }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Lua source run by Redis
    pub fn lua(&self) -> &'static str {
        self.lua
    }

    /// Run the native rendition against a context
    pub fn run_native(
        &self,
        context: &mut dyn ScriptContext,
        keys: &[String],
        args: &[Bytes],
    ) -> Result<ScriptValue, StoreError> {
        (self.native)(context, keys, args)
    }
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Script").field("name", &self.name).finish()
    }
}

/// Data-structure primitives available to native scripts.
///
/// Semantics follow the Redis commands of the same name: an emptied hash or
/// sorted set ceases to exist, scores are integers (Unix milliseconds), and
/// ranges are inclusive.
pub trait ScriptContext {
    /// Store time in Unix milliseconds
    fn now_millis(&self) -> i64;

    fn exists(&self, key: &str) -> bool;

    fn del(&mut self, key: &str) -> bool;

    fn hget(&self, key: &str, field: &str) -> Option<Bytes>;

    fn hset(&mut self, key: &str, field: &str, value: Bytes);

    /// Set only if the field is absent; true when set
    fn hsetnx(&mut self, key: &str, field: &str, value: Bytes) -> bool;

    /// Returns the number of fields removed
    fn hdel(&mut self, key: &str, fields: &[String]) -> usize;

    fn hincrby(&mut self, key: &str, field: &str, by: i64) -> Result<i64, StoreError>;

    fn zadd(&mut self, key: &str, score: i64, member: &str);

    fn zrem(&mut self, key: &str, member: &str) -> bool;

    fn zscore(&self, key: &str, member: &str) -> Option<i64>;

    /// Members with `min <= score <= max`, ordered by score then member
    fn zrange_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
        limit: Option<usize>,
    ) -> Vec<(String, i64)>;

    fn zcount(&self, key: &str, min: i64, max: i64) -> u64;

    fn sadd(&mut self, key: &str, member: &str) -> bool;

    fn srem(&mut self, key: &str, member: &str) -> bool;
}

/// Reply of a script, common to the Lua and native renditions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptValue {
    Nil,
    Int(i64),
    Data(Bytes),
    Array(Vec<ScriptValue>),
}

impl ScriptValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Data(Bytes::from(value.into()))
    }

    /// Integer reply; numeric strings are accepted as Redis returns hash
    /// values as strings
    pub fn as_i64(&self) -> Result<i64, StoreError> {
        match self {
            Self::Int(value) => Ok(*value),
            Self::Data(bytes) => std::str::from_utf8(bytes)
                .ok()
                .and_then(|text| text.parse::<i64>().ok())
                .ok_or_else(|| StoreError::unexpected("expected an integer reply")),
            other => Err(StoreError::unexpected(format!(
                "expected an integer reply, got {:?}",
                other
            ))),
        }
    }

    pub fn into_bytes(self) -> Result<Bytes, StoreError> {
        match self {
            Self::Data(bytes) => Ok(bytes),
            other => Err(StoreError::unexpected(format!(
                "expected a bulk reply, got {:?}",
                other
            ))),
        }
    }

    pub fn into_string(self) -> Result<String, StoreError> {
        let bytes = self.into_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| StoreError::unexpected("bulk reply is not valid UTF-8"))
    }

    pub fn into_array(self) -> Result<Vec<ScriptValue>, StoreError> {
        match self {
            Self::Array(items) => Ok(items),
            other => Err(StoreError::unexpected(format!(
                "expected an array reply, got {:?}",
                other
            ))),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }
}

impl From<i64> for ScriptValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<Bytes> for ScriptValue {
    fn from(value: Bytes) -> Self {
        Self::Data(value)
    }
}

/// Parse a script argument as an integer
pub fn arg_i64(args: &[Bytes], index: usize) -> Result<i64, StoreError> {
    let raw = args
        .get(index)
        .ok_or_else(|| StoreError::unexpected(format!("missing script argument {}", index)))?;
    std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(|| StoreError::unexpected(format!("script argument {} is not an integer", index)))
}

/// Script argument as text; empty when the argument is absent
pub fn arg_str(args: &[Bytes], index: usize) -> Result<&str, StoreError> {
    match args.get(index) {
        Some(raw) => std::str::from_utf8(raw).map_err(|_| {
            StoreError::unexpected(format!("script argument {} is not valid UTF-8", index))
        }),
        None => Ok(""),
    }
}

/// Script key by position
pub fn key(keys: &[String], index: usize) -> Result<&str, StoreError> {
    keys.get(index)
        .map(String::as_str)
        .ok_or_else(|| StoreError::unexpected(format!("missing script key {}", index)))
}

/// Encode an integer as a store value
pub fn int_value(value: i64) -> Bytes {
    Bytes::from(value.to_string())
}
