//! Error taxonomy for cache bookkeeping and persistence.
//!
//! None of these errors ever reach the caller of a memoized function: the wrapped function's
//! own error type is returned verbatim, while persistence failures are logged and recovered
//! locally. `CacheError` surfaces only from registration and from the lower level store API.

use std::path::PathBuf;

use crate::config::StorageFormat;

/// Failures raised by the cache manager and its persistence adapter.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Reading, writing, renaming or removing a table file failed.
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A table could not be serialized in the configured format.
    #[error("failed to encode table as {format}: {message}")]
    Encode { format: StorageFormat, message: String },
    /// A persisted table exists but could not be decoded.
    #[error("failed to decode {}: {message}", .path.display())]
    Decode { path: PathBuf, message: String },
    /// The call arguments have no canonical representation.
    #[error("cannot derive cache key from arguments: {0}")]
    Key(String),
    /// The function name cannot be used to derive a file name.
    #[error("{0:?} is not a valid cached function name")]
    InvalidName(String),
    /// Another wrapper already owns the table for this function name.
    #[error("a cached function named {0:?} is already registered")]
    AlreadyRegistered(String),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Whether the failure came from unreadable persisted data rather than the environment.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
