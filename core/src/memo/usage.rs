//! Per-key observation counters consumed by culling.

use std::collections::HashMap;

use crate::key::CallKey;

/// Number of times each key was observed (hit or freshly computed) since the last cull.
#[derive(Debug, Default, Clone)]
pub struct UsageIndex {
    counts: HashMap<CallKey, u64>,
}

impl UsageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, key: &CallKey) {
        let count = self.counts.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(1);
    }

    /// `None` when the key was never observed this cycle.
    pub fn count(&self, key: &CallKey) -> Option<u64> {
        self.counts.get(key).copied()
    }

    /// A key is cold when it was never observed or observed fewer than `threshold` times.
    pub fn is_cold(&self, key: &CallKey, threshold: u64) -> bool {
        self.count(key).is_none_or(|count| count < threshold)
    }

    /// Forget every key below `threshold`.
    pub fn retain_at_least(&mut self, threshold: u64) {
        self.counts.retain(|_, count| *count >= threshold);
    }

    pub fn remove(&mut self, key: &CallKey) {
        self.counts.remove(key);
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }
}
