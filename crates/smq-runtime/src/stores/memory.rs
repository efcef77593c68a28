//! In-memory store implementation for testing and development.
//!
//! This module provides a store with Redis data-structure semantics that:
//! - Runs the native rendition of every script under one lock, so scripts are
//!   atomic with respect to each other
//! - Restores the keys a script was given when the script fails, so a failed
//!   script leaves no partial writes behind
//! - Drops hashes, sorted sets and sets once they become empty
//! - Reads time from an injectable [`Clock`]
//!
//! This store is intended for:
//! - Unit and integration testing of queue consumers
//! - Development without a Redis server

use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::store::{Script, ScriptContext, ScriptValue, Store, StoreKind};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Sorted set with Redis ordering: by score, then by member
#[derive(Debug, Default, Clone)]
struct SortedSet {
    ordered: BTreeSet<(i64, String)>,
    scores: HashMap<String, i64>,
}

impl SortedSet {
    fn insert(&mut self, score: i64, member: &str) {
        if let Some(previous) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(previous, member.to_string()));
        }
        self.ordered.insert((score, member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(score, member.to_string()));
                true
            }
            None => false,
        }
    }

    fn range(&self, min: i64, max: i64) -> impl Iterator<Item = &(i64, String)> {
        self.ordered
            .range((min, String::new())..)
            .take_while(move |(score, _)| *score <= max)
    }

    fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

#[derive(Debug, Clone)]
enum Entry {
    Hash(HashMap<String, Bytes>),
    SortedSet(SortedSet),
    Set(HashSet<String>),
}

/// All keys of the store
#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    fn hash(&self, key: &str) -> Option<&HashMap<String, Bytes>> {
        match self.entries.get(key) {
            Some(Entry::Hash(hash)) => Some(hash),
            _ => None,
        }
    }

    fn hash_mut(&mut self, key: &str) -> &mut HashMap<String, Bytes> {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(HashMap::new()));
        if !matches!(entry, Entry::Hash(_)) {
            *entry = Entry::Hash(HashMap::new());
        }
        match entry {
            Entry::Hash(hash) => hash,
            _ => unreachable!("entry was just made a hash"),
        }
    }

    fn sorted_set(&self, key: &str) -> Option<&SortedSet> {
        match self.entries.get(key) {
            Some(Entry::SortedSet(set)) => Some(set),
            _ => None,
        }
    }

    fn sorted_set_mut(&mut self, key: &str) -> &mut SortedSet {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::SortedSet(SortedSet::default()));
        if !matches!(entry, Entry::SortedSet(_)) {
            *entry = Entry::SortedSet(SortedSet::default());
        }
        match entry {
            Entry::SortedSet(set) => set,
            _ => unreachable!("entry was just made a sorted set"),
        }
    }

    fn set_mut(&mut self, key: &str) -> &mut HashSet<String> {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Set(HashSet::new()));
        if !matches!(entry, Entry::Set(_)) {
            *entry = Entry::Set(HashSet::new());
        }
        match entry {
            Entry::Set(set) => set,
            _ => unreachable!("entry was just made a set"),
        }
    }

    /// Current contents of `keys`, for [`Keyspace::restore`]
    fn snapshot(&self, keys: &[String]) -> Vec<(String, Option<Entry>)> {
        keys.iter()
            .map(|key| (key.clone(), self.entries.get(key).cloned()))
            .collect()
    }

    fn restore(&mut self, snapshot: Vec<(String, Option<Entry>)>) {
        for (key, entry) in snapshot {
            match entry {
                Some(entry) => {
                    self.entries.insert(key, entry);
                }
                None => {
                    self.entries.remove(&key);
                }
            }
        }
    }

    /// Remove `key` if its collection became empty
    fn prune(&mut self, key: &str) {
        let empty = match self.entries.get(key) {
            Some(Entry::Hash(hash)) => hash.is_empty(),
            Some(Entry::SortedSet(set)) => set.is_empty(),
            Some(Entry::Set(set)) => set.is_empty(),
            None => false,
        };
        if empty {
            self.entries.remove(key);
        }
    }
}

/// Script execution view over the locked keyspace at a fixed instant
struct LockedContext<'a> {
    keyspace: &'a mut Keyspace,
    now: i64,
}

impl ScriptContext for LockedContext<'_> {
    fn now_millis(&self) -> i64 {
        self.now
    }

    fn exists(&self, key: &str) -> bool {
        self.keyspace.entries.contains_key(key)
    }

    fn del(&mut self, key: &str) -> bool {
        self.keyspace.entries.remove(key).is_some()
    }

    fn hget(&self, key: &str, field: &str) -> Option<Bytes> {
        self.keyspace.hash(key)?.get(field).cloned()
    }

    fn hset(&mut self, key: &str, field: &str, value: Bytes) {
        self.keyspace.hash_mut(key).insert(field.to_string(), value);
    }

    fn hsetnx(&mut self, key: &str, field: &str, value: Bytes) -> bool {
        let hash = self.keyspace.hash_mut(key);
        if hash.contains_key(field) {
            return false;
        }
        hash.insert(field.to_string(), value);
        true
    }

    fn hdel(&mut self, key: &str, fields: &[String]) -> usize {
        let removed = match self.keyspace.entries.get_mut(key) {
            Some(Entry::Hash(hash)) => fields
                .iter()
                .filter(|field| hash.remove(field.as_str()).is_some())
                .count(),
            _ => 0,
        };
        self.keyspace.prune(key);
        removed
    }

    fn hincrby(&mut self, key: &str, field: &str, by: i64) -> Result<i64, StoreError> {
        let hash = self.keyspace.hash_mut(key);
        let current = match hash.get(field) {
            Some(raw) => std::str::from_utf8(raw)
                .ok()
                .and_then(|text| text.parse::<i64>().ok())
                .ok_or_else(|| StoreError::CommandFailed {
                    command: "HINCRBY".to_string(),
                    message: format!("hash value of '{}' is not an integer", field),
                })?,
            None => 0,
        };
        let updated = current.checked_add(by).ok_or_else(|| StoreError::CommandFailed {
            command: "HINCRBY".to_string(),
            message: "increment or decrement would overflow".to_string(),
        })?;
        hash.insert(field.to_string(), Bytes::from(updated.to_string()));
        Ok(updated)
    }

    fn zadd(&mut self, key: &str, score: i64, member: &str) {
        self.keyspace.sorted_set_mut(key).insert(score, member);
    }

    fn zrem(&mut self, key: &str, member: &str) -> bool {
        let removed = match self.keyspace.entries.get_mut(key) {
            Some(Entry::SortedSet(set)) => set.remove(member),
            _ => false,
        };
        self.keyspace.prune(key);
        removed
    }

    fn zscore(&self, key: &str, member: &str) -> Option<i64> {
        self.keyspace.sorted_set(key)?.scores.get(member).copied()
    }

    fn zrange_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
        limit: Option<usize>,
    ) -> Vec<(String, i64)> {
        let Some(set) = self.keyspace.sorted_set(key) else {
            return Vec::new();
        };
        set.range(min, max)
            .take(limit.unwrap_or(usize::MAX))
            .map(|(score, member)| (member.clone(), *score))
            .collect()
    }

    fn zcount(&self, key: &str, min: i64, max: i64) -> u64 {
        self.keyspace
            .sorted_set(key)
            .map(|set| set.range(min, max).count() as u64)
            .unwrap_or(0)
    }

    fn sadd(&mut self, key: &str, member: &str) -> bool {
        self.keyspace.set_mut(key).insert(member.to_string())
    }

    fn srem(&mut self, key: &str, member: &str) -> bool {
        let removed = match self.keyspace.entries.get_mut(key) {
            Some(Entry::Set(set)) => set.remove(member),
            _ => false,
        };
        self.keyspace.prune(key);
        removed
    }
}

// ============================================================================
// Store Implementation
// ============================================================================

/// In-memory store with Redis data-structure semantics
pub struct InMemoryStore {
    keyspace: Mutex<Keyspace>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    /// Create an empty store on the wall clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store reading time from `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            keyspace: Mutex::new(Keyspace::default()),
            clock,
        }
    }

    /// Number of keys currently held
    pub fn key_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.entries.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Keyspace>, StoreError> {
        self.keyspace.lock().map_err(|_| StoreError::Unavailable {
            message: "in-memory store lock poisoned".to_string(),
        })
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn eval(
        &self,
        script: &Script,
        keys: &[String],
        args: &[Bytes],
    ) -> Result<ScriptValue, StoreError> {
        let mut keyspace = self.lock()?;
        // Scripts only touch the keys they are given
        let snapshot = keyspace.snapshot(keys);
        let mut context = LockedContext {
            keyspace: &mut *keyspace,
            now: self.clock.now_millis(),
        };
        let result = script.run_native(&mut context, keys, args);
        if let Err(e) = &result {
            debug!(script = script.name(), error = %e, "Script failed; restoring its keys");
            keyspace.restore(snapshot);
        }
        result
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let keyspace = self.lock()?;
        Ok(match keyspace.entries.get(key) {
            Some(Entry::Set(set)) => set.iter().cloned().collect(),
            _ => Vec::new(),
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    fn kind(&self) -> StoreKind {
        StoreKind::InMemory
    }
}
