//! Key/value storage backends

use std::collections::HashMap;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

/// Errors from a storage backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Storage quota exceeded: {needed} bytes needed, {quota} allowed")]
    QuotaExceeded { needed: usize, quota: usize },

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable byte store addressed by string keys
pub trait StorageBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

    /// Replace the value under `key` in full
    fn write(&self, key: &str, value: &[u8]) -> Result<(), BackendError>;

    /// Remove `key`; removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<(), BackendError>;
}

/// Shared in-memory map, optionally capped to emulate a full store
///
/// Clones share the same map, so two controllers built on clones behave like
/// two replicas over one durable store.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    quota: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that refuses writes once the total stored bytes would exceed `quota`
    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: Arc::default(),
            quota: Some(quota),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Total bytes stored across all keys
    pub fn used_bytes(&self) -> usize {
        self.entries.lock().values().map(Vec::len).sum()
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn write(&self, key: &str, value: &[u8]) -> Result<(), BackendError> {
        let mut entries = self.entries.lock();
        if let Some(quota) = self.quota {
            let others: usize = entries.iter().filter(|(k, _)| k.as_str() != key).map(|(_, v)| v.len()).sum();
            let needed = others + value.len();
            if needed > quota {
                debug!(key, needed, quota, "MemoryBackend::write: quota exceeded");
                return Err(BackendError::QuotaExceeded { needed, quota });
            }
        }
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// One file per key under a root directory
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        debug!(root = %root.display(), "FileBackend::new: called");
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key such as `default/state` onto a path under the root
    fn path_for(&self, key: &str) -> Result<PathBuf, BackendError> {
        let relative = Path::new(key);
        let valid = !key.is_empty() && relative.components().all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(BackendError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

/// Write via a uniquely named temp file and rename so readers never see a
/// partial record, even with several writers on one directory
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

impl StorageBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &[u8]) -> Result<(), BackendError> {
        let path = self.path_for(key)?;
        debug!(path = %path.display(), bytes = value.len(), "FileBackend::write");
        atomic_write(&path, value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), BackendError> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
