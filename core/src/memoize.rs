//! Memoized function wrappers.
//!
//! [`Memoized`] and [`AsyncMemoized`] only differ in how the underlying function is invoked.
//! Everything else (key derivation, lookup, storing, flush scheduling and the unwind commit) is
//! done by the shared [`FunctionCache`] core. Table locks are never held while the underlying
//! function runs, so concurrent misses on one key each compute and the first stored result wins.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::WrapConfig;
use crate::error::Result;
use crate::key::CallKey;
use crate::manager::{CacheValue, ManagedTable, ManagerInner};
use crate::memo::{CullOutcome, FlushSchedule, MemoTable};

#[derive(Debug)]
struct SlotState<V> {
    table: MemoTable<V>,
    schedule: FlushSchedule,
    /// Whether the manager's registry currently points at this slot.
    attached: bool,
}

/// One function's table, shared between its wrapper and the manager registry.
pub(crate) struct TableSlot<V> {
    name: String,
    config: WrapConfig,
    state: Mutex<SlotState<V>>,
}

impl<V> fmt::Debug for TableSlot<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("TableSlot");
        debug.field("name", &self.name);
        if let Some(state) = self.state.try_lock() {
            debug.field("entries", &state.table.len()).field("attached", &state.attached);
        }
        debug.finish_non_exhaustive()
    }
}

impl<V: CacheValue> TableSlot<V> {
    pub(crate) fn new(
        name: &str,
        config: WrapConfig,
        table: MemoTable<V>,
        schedule: FlushSchedule,
    ) -> Self {
        Self {
            name: name.to_string(),
            config,
            state: Mutex::new(SlotState { table, schedule, attached: true }),
        }
    }

    fn save(&self, state: &mut SlotState<V>, manager: &ManagerInner, now: Instant) -> Result<()> {
        manager.store().save(&self.name, state.table.iter())?;
        state.schedule.mark_flushed(state.table.len(), now);
        Ok(())
    }
}

impl<V: CacheValue> ManagedTable for TableSlot<V> {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.state.lock().table.len()
    }

    fn flush(&self, manager: &ManagerInner) -> Result<()> {
        let mut state = self.state.lock();
        if !state.attached {
            return Ok(());
        }
        let result = self.save(&mut state, manager, Instant::now());
        if result.is_err() {
            manager.set_dirty(&self.name, true);
        }
        result
    }

    fn cull(&self, threshold: u64, manager: &ManagerInner) -> CullOutcome {
        let mut state = self.state.lock();
        let outcome = state.table.cull(threshold);

        if outcome.emptied() {
            state.attached = false;
            manager.detach(&self.name);
            if let Err(err) = manager.store().remove(&self.name) {
                warn!(function = %self.name, error = %err, "failed to remove culled cache table");
            }
        } else {
            let saved = self.save(&mut state, manager, Instant::now()).is_ok();
            manager.set_dirty(&self.name, !saved);
            manager.stats().record_flush(saved);
        }

        manager.stats().record_cull(outcome.removed, outcome.emptied());
        debug!(
            function = %self.name,
            removed = outcome.removed,
            remaining = outcome.remaining,
            "culled memo table"
        );
        outcome
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.table.clear();
        state.attached = false;
    }
}

/// Commits dirty tables if the underlying function unwinds while this guard is armed.
struct CommitOnUnwind<'a> {
    manager: &'a ManagerInner,
    armed: bool,
}

impl CommitOnUnwind<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CommitOnUnwind<'_> {
    fn drop(&mut self) {
        if self.armed && std::thread::panicking() {
            warn!("memoized function panicked; committing dirty cache tables");
            self.manager.commit_all();
        }
    }
}

enum Lookup<V> {
    Hit(V),
    Miss(CallKey),
    Uncacheable,
}

/// Cache core of one memoized function.
pub struct FunctionCache<V> {
    manager: Arc<ManagerInner>,
    slot: Arc<TableSlot<V>>,
}

impl<V> fmt::Debug for FunctionCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionCache").field("slot", &self.slot).finish()
    }
}

impl<V: CacheValue> FunctionCache<V> {
    pub(crate) fn new(manager: Arc<ManagerInner>, slot: Arc<TableSlot<V>>) -> Self {
        Self { manager, slot }
    }

    pub fn name(&self) -> &str {
        &self.slot.name
    }

    pub fn config(&self) -> &WrapConfig {
        &self.slot.config
    }

    /// Number of entries currently held in memory.
    pub fn len(&self) -> usize {
        self.slot.state.lock().table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a result for `args` is held, regardless of the null-result policy.
    pub fn contains<A: Serialize + ?Sized>(&self, args: &A) -> bool {
        match CallKey::from_args(args) {
            Ok(key) => self.slot.state.lock().table.contains(&key),
            Err(_) => false,
        }
    }

    /// Times `args` was observed since the last cull.
    pub fn usage<A: Serialize + ?Sized>(&self, args: &A) -> Option<u64> {
        let key = CallKey::from_args(args).ok()?;
        self.slot.state.lock().table.usage().count(&key)
    }

    /// Re-register and reload after a cull or clear detached this table.
    ///
    /// If another wrapper took the name meanwhile, the table keeps working in memory only.
    fn ensure_attached(&self, state: &mut MutexGuard<'_, SlotState<V>>) {
        if state.attached {
            return;
        }
        match self.manager.attach(self.name(), self.slot.clone()) {
            Ok(()) => {
                let entries = self.manager.load_entries::<V>(self.name());
                state.table = MemoTable::from_persisted(entries);
                let size = state.table.len();
                state.schedule = FlushSchedule::new(&self.slot.config, size, Instant::now());
                state.attached = true;
                debug!(function = self.name(), entries = size, "reattached memo table");
            }
            Err(err) => {
                warn!(function = self.name(), error = %err, "memo table stays in memory only");
            }
        }
    }

    fn begin<A: Serialize>(&self, args: &A) -> Lookup<V> {
        let key = match CallKey::from_args(args) {
            Ok(key) => key,
            Err(err) => {
                self.manager.stats().record_uncacheable();
                warn!(function = self.name(), error = %err, "calling without cache");
                return Lookup::Uncacheable;
            }
        };

        let mut state = self.slot.state.lock();
        self.ensure_attached(&mut state);

        let cache_null = self.slot.config.cache_null_results;
        let hit = match state.table.get(&key) {
            Some(entry) if cache_null || !entry.is_null_like() => Some(entry.value().clone()),
            Some(_) => {
                self.manager.stats().record_null_recompute();
                None
            }
            None => None,
        };

        self.manager.stats().record_lookup(hit.is_some());
        match hit {
            Some(value) => {
                state.table.observe(&key);
                Lookup::Hit(value)
            }
            None => Lookup::Miss(key),
        }
    }

    fn guard(&self) -> CommitOnUnwind<'_> {
        CommitOnUnwind { manager: &self.manager, armed: true }
    }

    fn complete<E>(&self, key: Option<CallKey>, outcome: &std::result::Result<V, E>) {
        self.manager.stats().record_computation(outcome.is_ok());
        match (key, outcome) {
            (Some(key), Ok(value)) => self.store(key, value),
            (_, Err(_)) => debug!(function = self.name(), "computation failed; nothing cached"),
            (None, Ok(_)) => {}
        }
    }

    fn store(&self, key: CallKey, value: &V) {
        let mut state = self.slot.state.lock();
        self.ensure_attached(&mut state);

        if !state.table.insert(key.clone(), value.clone()) {
            return;
        }
        if state.table.get(&key).is_some_and(|entry| entry.is_null_like()) {
            debug!(function = self.name(), key = %key, "cached a null result");
        }
        if !state.attached {
            return;
        }

        let now = Instant::now();
        let size = state.table.len();
        if state.schedule.is_due(size, now) {
            let saved = self.slot.save(&mut state, &self.manager, now).is_ok();
            self.manager.set_dirty(self.name(), !saved);
            self.manager.stats().record_flush(saved);
        } else {
            self.manager.set_dirty(self.name(), true);
            self.manager.stats().record_deferred_flush();
        }
    }
}

/// A blocking function whose results are memoized.
pub struct Memoized<A, V, E, F> {
    cache: FunctionCache<V>,
    func: F,
    _call: PhantomData<fn(A) -> std::result::Result<V, E>>,
}

impl<A, V, E, F> fmt::Debug for Memoized<A, V, E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized").field("cache", &self.cache).finish_non_exhaustive()
    }
}

impl<A, V, E, F> Memoized<A, V, E, F>
where
    A: Serialize,
    V: CacheValue,
    F: Fn(A) -> std::result::Result<V, E>,
{
    pub(crate) fn new(cache: FunctionCache<V>, func: F) -> Self {
        Self { cache, func, _call: PhantomData }
    }

    /// Return the cached result for `args`, computing and storing it on a miss.
    ///
    /// Errors from the function are returned as-is and never cached.
    pub fn call(&self, args: A) -> std::result::Result<V, E> {
        let key = match self.cache.begin(&args) {
            Lookup::Hit(value) => return Ok(value),
            Lookup::Miss(key) => Some(key),
            Lookup::Uncacheable => None,
        };

        let guard = self.cache.guard();
        let outcome = (self.func)(args);
        guard.disarm();

        self.cache.complete(key, &outcome);
        outcome
    }

    pub fn cache(&self) -> &FunctionCache<V> {
        &self.cache
    }
}

/// An async function whose results are memoized. Concurrent same-key misses are not coalesced.
pub struct AsyncMemoized<A, V, E, F> {
    cache: FunctionCache<V>,
    func: F,
    _call: PhantomData<fn(A) -> std::result::Result<V, E>>,
}

impl<A, V, E, F> fmt::Debug for AsyncMemoized<A, V, E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncMemoized").field("cache", &self.cache).finish_non_exhaustive()
    }
}

impl<A, V, E, F> AsyncMemoized<A, V, E, F>
where
    A: Serialize,
    V: CacheValue,
{
    pub(crate) fn new(cache: FunctionCache<V>, func: F) -> Self {
        Self { cache, func, _call: PhantomData }
    }

    /// Await the cached result for `args`, running the function on a miss.
    pub async fn call<Fut>(&self, args: A) -> std::result::Result<V, E>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        let key = match self.cache.begin(&args) {
            Lookup::Hit(value) => return Ok(value),
            Lookup::Miss(key) => Some(key),
            Lookup::Uncacheable => None,
        };

        let guard = self.cache.guard();
        let outcome = (self.func)(args).await;
        guard.disarm();

        self.cache.complete(key, &outcome);
        outcome
    }

    pub fn cache(&self) -> &FunctionCache<V> {
        &self.cache
    }
}
