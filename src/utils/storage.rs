//! Storage - Durable Client-Side Key/Value Storage
//!
//! Small synchronous key/value store for client state that must survive a
//! restart (e.g. the frequently-visited ranking). Values are JSON documents.

use std::fs;
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};
use crate::helpers::get_or_create_data_dir;

/// Synchronous durable key/value storage
pub trait KeyValueStorage: Send + Sync {
    /// Raw value stored under `key`
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value stored under `key`
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`
    fn remove(&self, key: &str) -> Result<()>;
}

/// Load and decode a JSON value, or its default when absent
pub fn load_json<T: DeserializeOwned + Default>(storage: &dyn KeyValueStorage, key: &str) -> Result<T> {
    match storage.get(key)? {
        Some(content) if !content.trim().is_empty() => Ok(serde_json::from_str(&content)?),
        _ => Ok(T::default()),
    }
}

/// Encode and store a JSON value
pub fn save_json<T: Serialize>(storage: &dyn KeyValueStorage, key: &str, value: &T) -> Result<()> {
    let content = serde_json::to_string(value)?;
    storage.set(key, &content)
}

/// One JSON file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Storage rooted at `dir`, created if missing
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(Self { dir })
    }

    /// Storage in the platform data directory
    pub fn in_data_dir() -> Result<Self> {
        Self::new(get_or_create_data_dir()?)
    }

    /// Directory holding the files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(Error::Storage {
                key: key.to_string(),
                message: "key is not a plain file name".to_string(),
            });
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path(key)?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(&path)?))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path(key)?;
        // Write then rename so a crash never leaves a half-written document
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path(key)?;
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

/// In-memory storage for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: RwLock<AHashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_file_storage_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(dir.path()).expect("storage");

        assert_eq!(storage.get("ranking").expect("get"), None);
        storage.set("ranking", r#"{"a":1}"#).expect("set");
        assert_eq!(storage.get("ranking").expect("get").as_deref(), Some(r#"{"a":1}"#));
        assert!(dir.path().join("ranking.json").exists());

        storage.remove("ranking").expect("remove");
        assert_eq!(storage.get("ranking").expect("get"), None);
    }

    #[test]
    fn test_file_storage_rejects_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(dir.path()).expect("storage");
        assert!(matches!(storage.set("../escape", "x"), Err(Error::Storage { .. })));
        assert!(matches!(storage.get(""), Err(Error::Storage { .. })));
    }

    #[test]
    fn test_json_helpers() {
        let storage = MemoryStorage::new();
        let empty: BTreeMap<String, u32> = load_json(&storage, "counts").expect("load");
        assert!(empty.is_empty());

        let mut counts = BTreeMap::new();
        counts.insert("x".to_string(), 3u32);
        save_json(&storage, "counts", &counts).expect("save");
        let loaded: BTreeMap<String, u32> = load_json(&storage, "counts").expect("load");
        assert_eq!(loaded, counts);
    }

    #[test]
    fn test_corrupt_json_is_an_error() {
        let storage = MemoryStorage::new();
        storage.set("counts", "{not json").expect("set");
        let loaded: Result<BTreeMap<String, u32>> = load_json(&storage, "counts");
        assert!(matches!(loaded, Err(Error::Json { .. })));
    }
}
