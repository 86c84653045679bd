//! Persistence adapter: one file per memoized function.

pub mod codec;
pub mod disk;

pub use disk::TableStore;

pub type Result<T> = crate::error::Result<T>;
