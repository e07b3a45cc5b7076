//! Persistent Store Module
//!
//! String key/value stores backing the persistent tier of the cache. The
//! store is process-wide and may hold keys that belong to other parts of the
//! application; the cache only ever touches keys under its own prefix.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::StorageError;

// == Key Value Store Trait ==
/// Minimal string store in the shape of a browser's localStorage.
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    /// Reads an item.
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Writes an item, failing with `QuotaExceeded` when the store is full.
    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removes an item. Removing a missing key is not an error.
    fn remove_item(&mut self, key: &str) -> Result<(), StorageError>;

    /// Lists every key in the store.
    fn keys(&self) -> Vec<String>;
}

/// Bytes used by the given items, counting keys and values.
fn usage(items: &BTreeMap<String, String>) -> usize {
    items.iter().map(|(k, v)| k.len() + v.len()).sum()
}

/// Checks a pending write against an optional quota.
fn check_quota(
    items: &BTreeMap<String, String>,
    quota: Option<usize>,
    key: &str,
    value: &str,
) -> Result<(), StorageError> {
    let Some(quota) = quota else {
        return Ok(());
    };
    let previous = items.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
    let projected = usage(items) - previous + key.len() + value.len();
    if projected > quota {
        return Err(StorageError::QuotaExceeded(format!(
            "writing '{key}' needs {projected} bytes, quota is {quota}"
        )));
    }
    Ok(())
}

// == Memory Store ==
/// In-memory store with an optional byte quota.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    items: BTreeMap<String, String>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that rejects writes once `quota` bytes are used.
    pub fn with_quota(quota: usize) -> Self {
        Self {
            items: BTreeMap::new(),
            quota: Some(quota),
        }
    }

    /// Bytes currently used (keys plus values).
    pub fn used_bytes(&self) -> usize {
        usage(&self.items)
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        check_quota(&self.items, self.quota, key, value)?;
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> Result<(), StorageError> {
        self.items.remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.items.keys().cloned().collect()
    }
}

// == File Store ==
/// Store persisted as a single JSON object on disk.
///
/// Every mutation rewrites the file through a temporary sibling and a rename,
/// so a crash leaves either the old or the new snapshot. The write is
/// synchronous and happens under the cache lock; the store is bounded by the
/// key-value budget (a few MiB), so a rewrite stays short. Writes that would
/// not change the contents skip the disk entirely.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    items: BTreeMap<String, String>,
    quota: Option<usize>,
}

impl FileStore {
    /// Opens (or creates) the store at `path`.
    ///
    /// An unreadable or corrupt file is logged and replaced by an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let items = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Discarding corrupt store file {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        Ok(Self {
            path,
            items,
            quota: None,
        })
    }

    /// Applies a byte quota to subsequent writes.
    pub fn with_quota(mut self, quota: usize) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StorageError> {
        let raw = serde_json::to_string(&self.items)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.items.get(key).is_some_and(|current| current == value) {
            return Ok(());
        }
        check_quota(&self.items, self.quota, key, value)?;
        let previous = self.items.insert(key.to_string(), value.to_string());
        if let Err(e) = self.flush() {
            // Keep memory consistent with what is on disk
            match previous {
                Some(old) => self.items.insert(key.to_string(), old),
                None => self.items.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> Result<(), StorageError> {
        if self.items.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.items.keys().cloned().collect()
    }
}
