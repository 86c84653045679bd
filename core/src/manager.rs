//! The cache manager: registry of memo tables, dirty set, persistence and maintenance.
//!
//! Lock order: a table slot lock may be held while the registry lock is taken, never the other
//! way around. Registry-wide operations therefore snapshot the tables they need, release the
//! registry, and only then lock individual slots.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::{CacheConfig, WrapConfig};
use crate::error::{CacheError, Result};
use crate::key::CallKey;
use crate::memo::{CullOutcome, FlushSchedule, MemoTable};
use crate::memoize::{AsyncMemoized, FunctionCache, Memoized, TableSlot};
use crate::stats::{StatsCollector, StatsSnapshot};
use crate::store::TableStore;

/// Values a memoized function may return.
pub trait CacheValue: Serialize + DeserializeOwned + Clone + Send + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Clone + Send + 'static {}

/// Type-erased view of one function's table used by registry-wide operations.
pub(crate) trait ManagedTable: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn len(&self) -> usize;

    /// Persist the table. Failures re-mark the function dirty.
    fn flush(&self, manager: &ManagerInner) -> Result<()>;

    fn cull(&self, threshold: u64, manager: &ManagerInner) -> CullOutcome;

    /// Drop in-memory state; the table reloads from disk on next use.
    fn reset(&self);
}

/// Names of functions flushed by [`CacheDisk::commit_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub saved: Vec<String>,
    pub failed: Vec<String>,
}

impl CommitReport {
    pub fn is_empty(&self) -> bool {
        self.saved.is_empty() && self.failed.is_empty()
    }
}

/// Result of one [`CacheDisk::cull`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CullReport {
    /// Entries removed across every table.
    pub removed: usize,
    /// Functions whose reduced table was persisted.
    pub persisted: Vec<String>,
    /// Functions whose table became empty and was dropped along with its file.
    pub dropped: Vec<String>,
}

#[derive(Debug, Default)]
struct Registry {
    tables: HashMap<String, Arc<dyn ManagedTable>>,
    dirty: HashSet<String>,
}

#[derive(Debug)]
pub(crate) struct ManagerInner {
    config: CacheConfig,
    store: TableStore,
    registry: Mutex<Registry>,
    stats: StatsCollector,
}

impl ManagerInner {
    pub(crate) fn store(&self) -> &TableStore {
        &self.store
    }

    pub(crate) fn stats(&self) -> &StatsCollector {
        &self.stats
    }

    pub(crate) fn attach(&self, name: &str, table: Arc<dyn ManagedTable>) -> Result<()> {
        let mut registry = self.registry.lock();
        if registry.tables.contains_key(name) {
            return Err(CacheError::AlreadyRegistered(name.to_string()));
        }
        registry.tables.insert(name.to_string(), table);
        Ok(())
    }

    /// Forget a function entirely: registry entry and dirty mark.
    pub(crate) fn detach(&self, name: &str) {
        let mut registry = self.registry.lock();
        registry.tables.remove(name);
        registry.dirty.remove(name);
    }

    pub(crate) fn set_dirty(&self, name: &str, dirty: bool) {
        let mut registry = self.registry.lock();
        if dirty {
            registry.dirty.insert(name.to_string());
        } else {
            registry.dirty.remove(name);
        }
    }

    /// Load persisted entries, counting and logging unreadable tables.
    pub(crate) fn load_entries<V: DeserializeOwned>(&self, name: &str) -> Vec<(CallKey, V)> {
        match self.store.try_load(name) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(err) => {
                self.stats.record_load_failure();
                warn!(function = name, error = %err, "discarding unreadable cache table");
                Vec::new()
            }
        }
    }

    pub(crate) fn commit_all(&self) -> CommitReport {
        let pending: Vec<Arc<dyn ManagedTable>> = {
            let mut registry = self.registry.lock();
            let dirty = std::mem::take(&mut registry.dirty);
            dirty.iter().filter_map(|name| registry.tables.get(name).cloned()).collect()
        };

        let mut report = CommitReport::default();
        for table in pending {
            match table.flush(self) {
                Ok(()) => {
                    self.stats.record_flush(true);
                    report.saved.push(table.name().to_string());
                }
                Err(_) => {
                    self.stats.record_flush(false);
                    report.failed.push(table.name().to_string());
                }
            }
        }

        if !report.is_empty() {
            info!(
                saved = report.saved.len(),
                failed = report.failed.len(),
                "committed dirty cache tables"
            );
        }
        report
    }

    fn cull(&self, threshold: u64) -> CullReport {
        let tables: Vec<Arc<dyn ManagedTable>> =
            self.registry.lock().tables.values().cloned().collect();

        let mut report = CullReport::default();
        for table in tables {
            let outcome = table.cull(threshold, self);
            report.removed += outcome.removed;
            if outcome.emptied() {
                report.dropped.push(table.name().to_string());
            } else {
                report.persisted.push(table.name().to_string());
            }
        }

        info!(
            threshold,
            removed = report.removed,
            dropped = report.dropped.len(),
            "culled cache tables"
        );
        report
    }

    fn clear(&self) {
        let tables: Vec<Arc<dyn ManagedTable>> = {
            let mut registry = self.registry.lock();
            let registry = std::mem::take(&mut *registry);
            registry.tables.into_values().collect()
        };
        for table in tables {
            table.reset();
        }
        debug!("cleared in-memory cache state");
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        let report = self.commit_all();
        if !report.failed.is_empty() {
            warn!(failed = ?report.failed, "cache tables left unpersisted at shutdown");
        }
    }
}

/// Owns every memo table created through it.
///
/// Cloning is cheap and yields another handle to the same registry. Dirty tables are committed
/// when the last handle, including those held by wrapped functions, is dropped.
#[derive(Debug, Clone)]
pub struct CacheDisk {
    inner: Arc<ManagerInner>,
}

impl Default for CacheDisk {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl CacheDisk {
    pub fn new(config: CacheConfig) -> Self {
        let store = TableStore::from_config(&config);
        Self {
            inner: Arc::new(ManagerInner {
                config,
                store,
                registry: Mutex::new(Registry::default()),
                stats: StatsCollector::new(),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// The persistence adapter shared by every table.
    pub fn store(&self) -> &TableStore {
        &self.inner.store
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Memoize a blocking function under `name`, loading its persisted table now.
    pub fn wrap_sync<A, V, E, F>(
        &self,
        name: &str,
        config: WrapConfig,
        func: F,
    ) -> Result<Memoized<A, V, E, F>>
    where
        A: Serialize,
        V: CacheValue,
        F: Fn(A) -> std::result::Result<V, E>,
    {
        Ok(Memoized::new(self.register(name, config)?, func))
    }

    /// Memoize an async function under `name`, loading its persisted table now.
    pub fn wrap_async<A, V, E, F, Fut>(
        &self,
        name: &str,
        config: WrapConfig,
        func: F,
    ) -> Result<AsyncMemoized<A, V, E, F>>
    where
        A: Serialize,
        V: CacheValue,
        F: Fn(A) -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        Ok(AsyncMemoized::new(self.register(name, config)?, func))
    }

    /// Persist every dirty table. Safe to call repeatedly and from shutdown paths.
    pub fn commit_all(&self) -> CommitReport {
        self.inner.commit_all()
    }

    /// Evict entries observed fewer than `threshold` times since the previous cull.
    pub fn cull(&self, threshold: u64) -> CullReport {
        self.inner.cull(threshold)
    }

    /// Drop all in-memory state without touching disk. Wrappers reload lazily on next use.
    pub fn clear(&self) {
        self.inner.clear();
    }

    pub fn is_dirty(&self, name: &str) -> bool {
        self.inner.registry.lock().dirty.contains(name)
    }

    pub fn dirty_functions(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.registry.lock().dirty.iter().cloned().collect();
        names.sort();
        names
    }

    pub fn registered_functions(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.registry.lock().tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// In-memory entry count of a registered function.
    pub fn table_len(&self, name: &str) -> Option<usize> {
        let table = self.inner.registry.lock().tables.get(name).cloned();
        table.map(|table| table.len())
    }

    fn register<V: CacheValue>(&self, name: &str, config: WrapConfig) -> Result<FunctionCache<V>> {
        validate_name(name)?;
        if self.inner.registry.lock().tables.contains_key(name) {
            return Err(CacheError::AlreadyRegistered(name.to_string()));
        }

        let table = MemoTable::from_persisted(self.inner.load_entries::<V>(name));
        let loaded = table.len();
        let schedule = FlushSchedule::new(&config, loaded, Instant::now());
        let slot = Arc::new(TableSlot::new(name, config, table, schedule));
        self.inner.attach(name, slot.clone())?;

        info!(
            function = name,
            entries = loaded,
            format = %self.inner.config.format,
            "loaded memo table"
        );
        Ok(FunctionCache::new(self.inner.clone(), slot))
    }
}

fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.chars().any(|ch| matches!(ch, '/' | '\\' | '\0'));
    if invalid { Err(CacheError::InvalidName(name.to_string())) } else { Ok(()) }
}
