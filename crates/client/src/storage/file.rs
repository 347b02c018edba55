//! File-backed key-value storage adapter.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde_json::Value;

use super::{KeyValueStore, StorageError};

/// [`KeyValueStore`] adapter that persists all keys as a single JSON object
/// in one file.
///
/// Every write rewrites the file through a temporary sibling followed by a
/// rename, so a crash mid-write leaves the previous contents intact. The
/// whole map is also mirrored in memory; reads never touch the filesystem.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, Value>>,
}

impl JsonFileStore {
    /// Open a store at `path`, loading existing contents if the file exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the file exists but cannot be read
    /// or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|e| StorageError::Read {
                    key: path.display().to_string(),
                    reason: format!("store file is not valid JSON: {e}"),
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(StorageError::Read {
                    key: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, key: &str, entries: &HashMap<String, Value>) -> Result<(), StorageError> {
        let write_err = |reason: String| StorageError::Write {
            key: key.to_string(),
            reason,
        };

        let encoded = serde_json::to_vec_pretty(entries).map_err(|e| write_err(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, encoded).map_err(|e| write_err(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| write_err(e.to_string()))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = entries.insert(key.to_string(), value);

        if let Err(e) = self.flush(key, &entries) {
            // Keep memory and disk consistent on failure.
            match previous {
                Some(value) => entries.insert(key.to_string(), value),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(previous) = entries.remove(key) else {
            return Ok(());
        };

        if let Err(e) = self.flush(key, &entries) {
            entries.insert(key.to_string(), previous);
            return Err(StorageError::Remove {
                key: key.to_string(),
                reason: e.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "pomelo-store-{name}-{}.json",
            std::process::id()
        ));
        path
    }

    #[test]
    fn test_persists_across_reopen() {
        let path = temp_path("reopen");
        let _ = std::fs::remove_file(&path);

        {
            let store = JsonFileStore::open(&path).expect("open");
            store.set("token", json!("abc")).expect("set");
        }

        let store = JsonFileStore::open(&path).expect("reopen");
        assert_eq!(store.get("token").expect("get"), Some(json!("abc")));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_open_missing_file_is_empty() {
        let path = temp_path("missing");
        let _ = std::fs::remove_file(&path);

        let store = JsonFileStore::open(&path).expect("open");
        assert_eq!(store.get("anything").expect("get"), None);
    }

    #[test]
    fn test_remove_persists() {
        let path = temp_path("remove");
        let _ = std::fs::remove_file(&path);

        let store = JsonFileStore::open(&path).expect("open");
        store.set("cart", json!([1, 2])).expect("set");
        store.remove("cart").expect("remove");
        drop(store);

        let store = JsonFileStore::open(&path).expect("reopen");
        assert_eq!(store.get("cart").expect("get"), None);

        let _ = std::fs::remove_file(&path);
    }
}
