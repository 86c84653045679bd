//! Counters describing cache effectiveness and persistence health.
//!
//! Every [`crate::CacheDisk`] owns one collector shared by all of its wrapped functions. The
//! snapshot is serializable so applications can expose it through whatever diagnostics surface
//! they already have.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::warn;

#[derive(Debug)]
struct StatsInner {
    started_at: Instant,
    lookups: u64,
    hits: u64,
    null_recomputes: u64,
    computations: u64,
    failures: u64,
    uncacheable_calls: u64,
    flushes: u64,
    deferred_flushes: u64,
    save_failures: u64,
    load_failures: u64,
    culled_entries: u64,
    dropped_tables: u64,
}

impl Default for StatsInner {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            lookups: 0,
            hits: 0,
            null_recomputes: 0,
            computations: 0,
            failures: 0,
            uncacheable_calls: 0,
            flushes: 0,
            deferred_flushes: 0,
            save_failures: 0,
            load_failures: 0,
            culled_entries: 0,
            dropped_tables: 0,
        }
    }
}

fn bump(counter: &mut u64) {
    *counter = counter.saturating_add(1);
}

/// Thread-safe counter collection.
#[derive(Debug, Default)]
pub struct StatsCollector {
    inner: parking_lot::Mutex<StatsInner>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a table lookup and whether it was served from the cache.
    pub fn record_lookup(&self, hit: bool) {
        let mut guard = self.inner.lock();
        bump(&mut guard.lookups);
        if hit {
            bump(&mut guard.hits);
        }
    }

    /// A stored null-like value was ignored and the function ran again.
    pub fn record_null_recompute(&self) {
        bump(&mut self.inner.lock().null_recomputes);
    }

    /// Record the outcome of running the underlying function.
    pub fn record_computation(&self, succeeded: bool) {
        let mut guard = self.inner.lock();
        bump(&mut guard.computations);
        if !succeeded {
            bump(&mut guard.failures);
        }
    }

    /// A call bypassed the cache because its arguments have no canonical key.
    pub fn record_uncacheable(&self) {
        bump(&mut self.inner.lock().uncacheable_calls);
    }

    pub fn record_flush(&self, succeeded: bool) {
        let mut guard = self.inner.lock();
        if succeeded {
            bump(&mut guard.flushes);
        } else {
            bump(&mut guard.save_failures);
        }
    }

    pub fn record_deferred_flush(&self) {
        bump(&mut self.inner.lock().deferred_flushes);
    }

    pub fn record_load_failure(&self) {
        bump(&mut self.inner.lock().load_failures);
    }

    pub fn record_cull(&self, removed: usize, dropped_table: bool) {
        let mut guard = self.inner.lock();
        guard.culled_entries = guard.culled_entries.saturating_add(removed as u64);
        if dropped_table {
            bump(&mut guard.dropped_tables);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let guard = self.inner.lock();
        let hit_ratio = guard.hits as f32 / guard.lookups.max(1) as f32;

        StatsSnapshot {
            timestamp_ms: now_ms(),
            uptime_ms: guard.started_at.elapsed().as_millis() as u64,
            lookups: guard.lookups,
            hits: guard.hits,
            misses: guard.lookups - guard.hits,
            hit_ratio,
            null_recomputes: guard.null_recomputes,
            computations: guard.computations,
            failures: guard.failures,
            uncacheable_calls: guard.uncacheable_calls,
            flushes: guard.flushes,
            deferred_flushes: guard.deferred_flushes,
            save_failures: guard.save_failures,
            load_failures: guard.load_failures,
            culled_entries: guard.culled_entries,
            dropped_tables: guard.dropped_tables,
        }
    }
}

fn now_ms() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(delta) => delta.as_millis() as u64,
        Err(err) => {
            warn!("system clock error: {err}");
            0
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub timestamp_ms: u64,
    pub uptime_ms: u64,
    pub lookups: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f32,
    pub null_recomputes: u64,
    pub computations: u64,
    pub failures: u64,
    pub uncacheable_calls: u64,
    pub flushes: u64,
    pub deferred_flushes: u64,
    pub save_failures: u64,
    pub load_failures: u64,
    pub culled_entries: u64,
    pub dropped_tables: u64,
}
