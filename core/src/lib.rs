//! Transparent memoization of sync and async functions with on-disk persistence.
//!
//! A [`CacheDisk`] owns one memo table per wrapped function, loads it from
//! `{storage_directory}/{name}_cache.bak` when the function is wrapped, and flushes it back
//! when the table has grown enough or the last flush is old enough. Tables that have not
//! been flushed yet are tracked as dirty and persisted by [`CacheDisk::commit_all`].

#![deny(missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod key;
pub mod log;
pub mod manager;
pub mod memo;
pub mod memoize;
mod shape;
pub mod shutdown;
pub mod stats;
pub mod store;

pub use config::{CacheConfig, StorageFormat, WrapConfig};
pub use error::{CacheError, Result};
pub use key::{CallArgs, CallKey};
pub use manager::{CacheDisk, CacheValue, CommitReport, CullReport};
pub use memo::{is_null_like, representation_is_null_like};
pub use memoize::{AsyncMemoized, FunctionCache, Memoized};
pub use stats::StatsSnapshot;
pub use store::TableStore;

/// Returns the version of the core crate for diagnostics.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
