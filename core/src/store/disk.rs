//! File-backed table storage with atomic replacement.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::config::{CacheConfig, StorageFormat};
use crate::error::CacheError;
use crate::key::CallKey;

use super::Result;
use super::codec;

const FILE_SUFFIX: &str = "_cache.bak";
const TEMP_SUFFIX: &str = ".temp";

/// Reads and writes `{root}/{function}_cache.bak` files in one format.
#[derive(Debug, Clone)]
pub struct TableStore {
    root: PathBuf,
    format: StorageFormat,
}

impl TableStore {
    /// The directory is created lazily by the first save.
    pub fn new(root: impl Into<PathBuf>, format: StorageFormat) -> Self {
        Self { root: root.into(), format }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.storage_directory.clone(), config.format)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn format(&self) -> StorageFormat {
        self.format
    }

    /// Final path of the table persisted for `function`.
    pub fn path_for(&self, function: &str) -> PathBuf {
        self.root.join(format!("{function}{FILE_SUFFIX}"))
    }

    /// Read a table, returning `None` when nothing was persisted yet.
    pub fn try_load<V: DeserializeOwned>(
        &self,
        function: &str,
    ) -> Result<Option<Vec<(CallKey, V)>>> {
        let path = self.path_for(function);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(CacheError::io(path, err)),
        };
        codec::decode(self.format, &path, &bytes).map(Some)
    }

    /// Read a table, treating a missing or unreadable file as empty.
    pub fn load<V: DeserializeOwned>(&self, function: &str) -> Vec<(CallKey, V)> {
        match self.try_load(function) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(err) => {
                warn!(function, error = %err, "discarding unreadable cache table");
                Vec::new()
            }
        }
    }

    /// Persist the full table through a `.temp` sibling that is renamed over the final path.
    ///
    /// Failures are logged and returned; the previous file is left untouched.
    pub fn save<'a, V, I>(&self, function: &str, entries: I) -> Result<PathBuf>
    where
        V: Serialize + 'a,
        I: IntoIterator<Item = (&'a CallKey, &'a V)>,
    {
        let result = codec::encode(self.format, entries)
            .and_then(|data| self.write_atomic(function, &data));
        match &result {
            Ok(path) => debug!(function, path = %path.display(), "persisted cache table"),
            Err(err) => warn!(function, error = %err, "failed to persist cache table"),
        }
        result
    }

    /// Delete the persisted table. Missing files are not an error.
    pub fn remove(&self, function: &str) -> Result<()> {
        let path = self.path_for(function);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CacheError::io(path, err)),
        }
    }

    fn write_atomic(&self, function: &str, data: &[u8]) -> Result<PathBuf> {
        let target = self.path_for(function);
        fs::create_dir_all(&self.root).map_err(|err| CacheError::io(&self.root, err))?;

        let prefix = format!("{function}{FILE_SUFFIX}.");
        let mut temp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.root)
            .map_err(|err| CacheError::io(&self.root, err))?;
        let temp_path = temp.path().to_path_buf();
        temp.write_all(data).map_err(|err| CacheError::io(&temp_path, err))?;
        temp.flush().map_err(|err| CacheError::io(&temp_path, err))?;
        temp.as_file().sync_all().map_err(|err| CacheError::io(&temp_path, err))?;

        persist(temp, &target)?;
        self.sweep_temp_siblings(&prefix);
        Ok(target)
    }

    /// Remove temp siblings left behind by writers that died before their rename.
    fn sweep_temp_siblings(&self, prefix: &str) {
        let Ok(dir) = fs::read_dir(&self.root) else {
            return;
        };
        for entry in dir.flatten() {
            let name = entry.file_name();
            let Some(random) = name
                .to_str()
                .and_then(|name| name.strip_prefix(prefix))
                .and_then(|rest| rest.strip_suffix(TEMP_SUFFIX))
            else {
                continue;
            };
            if random.is_empty() || !random.chars().all(|c| c.is_ascii_alphanumeric()) {
                continue;
            }
            let path = entry.path();
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed stale temp table"),
                Err(err) => debug!(path = %path.display(), error = %err, "stale temp table kept"),
            }
        }
    }
}

fn persist(temp: NamedTempFile, target: &Path) -> Result<()> {
    match temp.persist(target) {
        Ok(_) => Ok(()),
        Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
            if let Err(remove_err) = fs::remove_file(target) {
                if remove_err.kind() != io::ErrorKind::NotFound {
                    return Err(CacheError::io(target, remove_err));
                }
            }
            err.file
                .persist(target)
                .map(|_| ())
                .map_err(|persist_err| CacheError::io(target, persist_err.error))
        }
        Err(err) => Err(CacheError::io(target, err.error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: u32) -> CallKey {
        CallKey::from_args(&[raw]).unwrap()
    }

    fn entries() -> Vec<(CallKey, String)> {
        vec![(key(1), "one".to_string()), (key(2), "two".to_string())]
    }

    fn sorted(mut entries: Vec<(CallKey, String)>) -> Vec<(CallKey, String)> {
        entries.sort();
        entries
    }

    #[test]
    fn missing_table_loads_empty() {
        let temp = tempfile::tempdir().unwrap();
        let store = TableStore::new(temp.path(), StorageFormat::Binary);
        assert!(store.try_load::<String>("absent").unwrap().is_none());
        assert!(store.load::<String>("absent").is_empty());
    }

    #[test]
    fn save_creates_directory_and_named_file() {
        let temp = tempfile::tempdir().unwrap();
        let store = TableStore::new(temp.path().join("nested").join("dir"), StorageFormat::Json);
        let data = entries();

        let path = store.save("lookup", data.iter().map(|(k, v)| (k, v))).unwrap();
        assert_eq!(path.file_name().unwrap(), "lookup_cache.bak");
        assert!(path.exists());
        assert_eq!(sorted(store.load("lookup")), sorted(data));
    }

    #[test]
    fn save_leaves_no_temp_siblings() {
        let temp = tempfile::tempdir().unwrap();
        let store = TableStore::new(temp.path(), StorageFormat::Binary);
        let data = entries();
        store.save("clean", data.iter().map(|(k, v)| (k, v))).unwrap();
        store.save("clean", data.iter().map(|(k, v)| (k, v))).unwrap();

        let names: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["clean_cache.bak".to_string()]);
    }

    #[test]
    fn save_sweeps_stale_temp_siblings() {
        let temp = tempfile::tempdir().unwrap();
        let store = TableStore::new(temp.path(), StorageFormat::Binary);
        fs::write(temp.path().join("sweep_cache.bak.Ab12cd.temp"), b"partial").unwrap();
        fs::write(temp.path().join("sweep_cache.bak.x_cache.bak.Q1.temp"), b"other").unwrap();
        fs::write(temp.path().join("other_cache.bak.Zz9.temp"), b"other").unwrap();

        let data = entries();
        store.save("sweep", data.iter().map(|(k, v)| (k, v))).unwrap();

        let mut names: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "other_cache.bak.Zz9.temp".to_string(),
                "sweep_cache.bak".to_string(),
                "sweep_cache.bak.x_cache.bak.Q1.temp".to_string(),
            ]
        );
    }

    #[test]
    fn corrupt_table_loads_empty() {
        let temp = tempfile::tempdir().unwrap();
        let store = TableStore::new(temp.path(), StorageFormat::Binary);
        fs::write(store.path_for("broken"), b"definitely not a table").unwrap();

        assert!(store.try_load::<String>("broken").unwrap_err().is_decode());
        assert!(store.load::<String>("broken").is_empty());
    }

    #[test]
    fn failed_save_keeps_previous_file() {
        let temp = tempfile::tempdir().unwrap();
        let store = TableStore::new(temp.path(), StorageFormat::Json);
        let data = entries();
        store.save("keep", data.iter().map(|(k, v)| (k, v))).unwrap();
        let before = fs::read(store.path_for("keep")).unwrap();

        // A regular file where the storage directory should be makes every save fail.
        let blocked = TableStore::new(store.path_for("keep"), StorageFormat::Json);
        assert!(blocked.save("keep", data.iter().map(|(k, v)| (k, v))).is_err());
        assert_eq!(fs::read(store.path_for("keep")).unwrap(), before);
    }

    #[test]
    fn removal_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let store = TableStore::new(temp.path(), StorageFormat::Binary);
        let data = entries();
        store.save("gone", data.iter().map(|(k, v)| (k, v))).unwrap();
        store.remove("gone").unwrap();
        store.remove("gone").unwrap();
        assert!(!store.path_for("gone").exists());
    }
}
