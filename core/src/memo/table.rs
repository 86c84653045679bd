//! The per-function memo table.

use std::collections::HashMap;

use serde::Serialize;

use crate::key::CallKey;

use super::entry::CacheEntry;
use super::usage::UsageIndex;

/// Result of culling one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CullOutcome {
    pub removed: usize,
    pub remaining: usize,
}

impl CullOutcome {
    pub fn emptied(&self) -> bool {
        self.remaining == 0
    }
}

/// Mapping from canonical call key to the first successfully computed result.
#[derive(Debug, Clone)]
pub struct MemoTable<V> {
    entries: HashMap<CallKey, CacheEntry<V>>,
    usage: UsageIndex,
}

impl<V> Default for MemoTable<V> {
    fn default() -> Self {
        Self { entries: HashMap::new(), usage: UsageIndex::new() }
    }
}

impl<V: Serialize> MemoTable<V> {
    /// Build a table from persisted entries. Loaded keys start unobserved.
    pub fn from_persisted(entries: impl IntoIterator<Item = (CallKey, V)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(key, value)| (key, CacheEntry::new(value)))
                .collect(),
            usage: UsageIndex::new(),
        }
    }

    /// Store `value` unless a non-null-like result is already present, then count the key.
    ///
    /// Returns whether the value was written.
    pub fn insert(&mut self, key: CallKey, value: V) -> bool {
        self.usage.observe(&key);
        match self.entries.get(&key) {
            Some(existing) if !existing.is_null_like() => false,
            _ => {
                self.entries.insert(key, CacheEntry::new(value));
                true
            }
        }
    }
}

impl<V> MemoTable<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look an entry up without touching usage counters.
    pub fn get(&self, key: &CallKey) -> Option<&CacheEntry<V>> {
        self.entries.get(key)
    }

    /// Count an access to `key`.
    pub fn observe(&mut self, key: &CallKey) {
        self.usage.observe(key);
    }

    pub fn contains(&self, key: &CallKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn usage(&self) -> &UsageIndex {
        &self.usage
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CallKey, &V)> {
        self.entries.iter().map(|(key, entry)| (key, entry.value()))
    }

    pub fn remove(&mut self, key: &CallKey) -> Option<CacheEntry<V>> {
        self.usage.remove(key);
        self.entries.remove(key)
    }

    /// Drop every key observed fewer than `threshold` times (or never) since the last cull,
    /// then narrow the usage index to the keys that survived.
    pub fn cull(&mut self, threshold: u64) -> CullOutcome {
        let before = self.entries.len();
        let usage = &self.usage;
        self.entries.retain(|key, _| !usage.is_cold(key, threshold));
        self.usage.retain_at_least(threshold);
        CullOutcome { removed: before - self.entries.len(), remaining: self.entries.len() }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.usage.clear();
    }
}
