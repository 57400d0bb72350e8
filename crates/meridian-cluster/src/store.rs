//! Meridian Key-Value Store
//!
//! The in-memory record store owned by each replica. Values are opaque JSON
//! payloads; deleting a key removes the record entirely (absence is the
//! tombstone). Ownership of a record moves between replicas during shard
//! migration via bulk snapshot and load.
//!
//! @version 0.1.0
//! @author Meridian Development Team

use serde_json::Value;
use std::collections::HashMap;

// =============================================================================
// Write Result
// =============================================================================

/// Result of applying a write to the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    /// A new record was created.
    Created,
    /// An existing record's value was replaced.
    Replaced,
    /// An existing record was deleted.
    Deleted,
}

impl WriteResult {
    /// The wire label for this result ("created" / "replaced" / "deleted").
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteResult::Created => "created",
            WriteResult::Replaced => "replaced",
            WriteResult::Deleted => "deleted",
        }
    }
}

// =============================================================================
// KV Store
// =============================================================================

/// In-memory key-value record store.
#[derive(Debug, Clone, Default)]
pub struct KvStore {
    records: HashMap<String, Value>,
}

impl KvStore {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    /// Insert or replace a record.
    pub fn put(&mut self, key: String, value: Value) -> WriteResult {
        match self.records.insert(key, value) {
            Some(_) => WriteResult::Replaced,
            None => WriteResult::Created,
        }
    }

    /// Remove a record, returning its value if it existed.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.records.remove(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Clone the full record map (bootstrap and migration snapshots).
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.records.clone()
    }

    /// Bulk-load records (migration). Existing keys are overwritten.
    pub fn load(&mut self, records: HashMap<String, Value>) {
        self.records.extend(records);
    }

    /// Remove and return every record whose key fails the predicate.
    /// Used during migration to purge keys that no longer hash locally.
    pub fn drain_not_matching<F>(&mut self, keep: F) -> Vec<(String, Value)>
    where
        F: Fn(&str) -> bool,
    {
        let doomed: Vec<String> = self
            .records
            .keys()
            .filter(|k| !keep(k))
            .cloned()
            .collect();

        doomed
            .into_iter()
            .filter_map(|k| self.records.remove(&k).map(|v| (k, v)))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
