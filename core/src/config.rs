//! Manager-wide and per-function cache configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};

const DIRECTORY_ENV_VAR: &str = "CACHEDISK_DIR";
const FORMAT_ENV_VAR: &str = "CACHEDISK_FORMAT";

/// Default directory holding one file per memoized function.
pub const DEFAULT_STORAGE_DIRECTORY: &str = "cache_data";
/// Default relative table growth that forces an immediate flush.
pub const DEFAULT_GROWTH_FACTOR: f64 = 0.33;
/// Default age of the last flush after which the next write is persisted.
pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_secs(120);

/// On-disk encoding used for every table of a manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum StorageFormat {
    /// Pretty-printed JSON object keyed by canonical call key.
    Json,
    /// Checksummed `bincode` payload; supports any serde-typed value.
    #[default]
    Binary,
}

impl StorageFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageFormat::Json => "json",
            StorageFormat::Binary => "binary",
        }
    }
}

impl fmt::Display for StorageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" | "structured" => Ok(StorageFormat::Json),
            "binary" | "bincode" => Ok(StorageFormat::Binary),
            other => Err(anyhow!("unknown storage format {other:?} (expected json or binary)")),
        }
    }
}

/// Configuration shared by every table owned by one [`crate::CacheDisk`].
///
/// The format and directory are fixed when the manager is constructed, before any table loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Directory holding `{function}_cache.bak` files. Created lazily on first save.
    pub storage_directory: PathBuf,
    /// Encoding used for every persisted table.
    pub format: StorageFormat,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            storage_directory: PathBuf::from(DEFAULT_STORAGE_DIRECTORY),
            format: StorageFormat::default(),
        }
    }
}

impl CacheConfig {
    /// Defaults overridden by `CACHEDISK_DIR` and `CACHEDISK_FORMAT` when they are set.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = env_value(DIRECTORY_ENV_VAR) {
            config.storage_directory = PathBuf::from(dir);
        }

        if let Some(format) = env_value(FORMAT_ENV_VAR) {
            config.format = format
                .parse()
                .with_context(|| format!("parsing {FORMAT_ENV_VAR}"))?;
        }

        Ok(config)
    }

    pub fn with_directory<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.storage_directory = path.into();
        self
    }

    pub fn with_format(mut self, format: StorageFormat) -> Self {
        self.format = format;
        self
    }

    /// Select the human-readable format (`true`) or the binary one (`false`).
    pub fn use_structured_format(self, structured: bool) -> Self {
        self.with_format(if structured { StorageFormat::Json } else { StorageFormat::Binary })
    }
}

fn env_value(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|value| !value.trim().is_empty())
}

/// Per-function policy chosen when the function is wrapped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WrapConfig {
    /// Relative growth since the last flush that triggers an immediate save.
    pub growth_factor: f64,
    /// Age of the last flush after which the next write triggers a save.
    pub flush_delay: Duration,
    /// Serve null-like results from the cache instead of recomputing them.
    pub cache_null_results: bool,
}

impl Default for WrapConfig {
    fn default() -> Self {
        Self {
            growth_factor: DEFAULT_GROWTH_FACTOR,
            flush_delay: DEFAULT_FLUSH_DELAY,
            cache_null_results: false,
        }
    }
}

impl WrapConfig {
    pub fn with_growth_factor(mut self, factor: f64) -> Self {
        self.growth_factor = factor;
        self
    }

    pub fn with_flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay = delay;
        self
    }

    /// Fractional seconds; negative or non-finite values collapse to zero.
    pub fn with_flush_delay_secs(self, seconds: f64) -> Self {
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        self.with_flush_delay(Duration::from_secs_f64(seconds))
    }

    pub fn with_cache_null_results(mut self, enabled: bool) -> Self {
        self.cache_null_results = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let wrap = WrapConfig::default();
        assert_eq!(wrap.growth_factor, 0.33);
        assert_eq!(wrap.flush_delay, Duration::from_secs(120));
        assert!(!wrap.cache_null_results);

        let cache = CacheConfig::default();
        assert_eq!(cache.storage_directory, PathBuf::from("cache_data"));
        assert_eq!(cache.format, StorageFormat::Binary);
    }

    #[test]
    fn parses_format_names() {
        assert_eq!("JSON".parse::<StorageFormat>().unwrap(), StorageFormat::Json);
        assert_eq!(" binary ".parse::<StorageFormat>().unwrap(), StorageFormat::Binary);
        assert!("yaml".parse::<StorageFormat>().is_err());
    }

    #[test]
    fn flush_delay_secs_rejects_garbage() {
        let config = WrapConfig::default().with_flush_delay_secs(-3.0);
        assert_eq!(config.flush_delay, Duration::ZERO);
        let config = WrapConfig::default().with_flush_delay_secs(0.5);
        assert_eq!(config.flush_delay, Duration::from_millis(500));
    }

    #[test]
    fn structured_toggle_selects_json() {
        let config = CacheConfig::default().use_structured_format(true);
        assert_eq!(config.format, StorageFormat::Json);
    }
}
