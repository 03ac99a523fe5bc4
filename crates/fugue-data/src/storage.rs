//! Storage backend collaborator

use crate::{DataError, DataResult, DataValue};
use dashmap::DashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Opaque address of an object stored by a backend
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationHandle(String);

impl LocationHandle {
    /// Wrap a backend address
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Backend address
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Serialize/deserialize primitives the tracker relies on
pub trait StorageBackend: Send + Sync {
    /// Store a value under a key
    fn put(&self, key: &str, value: &DataValue) -> DataResult<LocationHandle>;

    /// Fetch a value; fails with `CannotLoad` when absent or unreadable
    fn get(&self, handle: &LocationHandle) -> DataResult<DataValue>;

    /// Remove a stored value (missing values are not an error)
    fn delete(&self, handle: &LocationHandle) -> DataResult<()>;

    /// Whether a value is stored at the handle
    fn exists(&self, handle: &LocationHandle) -> bool;
}

/// Backend keeping values in a concurrent map
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: DashMap<String, DataValue>,
}

impl MemoryStorage {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl StorageBackend for MemoryStorage {
    fn put(&self, key: &str, value: &DataValue) -> DataResult<LocationHandle> {
        self.objects.insert(key.to_string(), value.clone());
        Ok(LocationHandle::new(key))
    }

    fn get(&self, handle: &LocationHandle) -> DataResult<DataValue> {
        self.objects
            .get(handle.as_str())
            .map(|v| v.value().clone())
            .ok_or_else(|| DataError::CannotLoad(handle.as_str().to_string()))
    }

    fn delete(&self, handle: &LocationHandle) -> DataResult<()> {
        self.objects.remove(handle.as_str());
        Ok(())
    }

    fn exists(&self, handle: &LocationHandle) -> bool {
        self.objects.contains_key(handle.as_str())
    }
}

/// Backend storing each value as a file under a root directory.
///
/// Handles are absolute paths, so locations registered by other components
/// with absolute file paths can be read through the same backend.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Store files under `root`, creating it if needed
    pub fn new(root: impl Into<PathBuf>) -> DataResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, handle: &LocationHandle) -> PathBuf {
        let path = Path::new(handle.as_str());
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl StorageBackend for FsStorage {
    fn put(&self, key: &str, value: &DataValue) -> DataResult<LocationHandle> {
        let path = self.root.join(key);
        fs::write(&path, value.bytes())?;
        tracing::debug!("Stored {} ({} bytes) at {}", key, value.len(), path.display());
        Ok(LocationHandle::new(path.to_string_lossy().into_owned()))
    }

    fn get(&self, handle: &LocationHandle) -> DataResult<DataValue> {
        let path = self.resolve(handle);
        match fs::read(&path) {
            Ok(bytes) => Ok(DataValue::new(bytes)),
            Err(e) => {
                tracing::debug!("Cannot read {}: {}", path.display(), e);
                Err(DataError::CannotLoad(handle.as_str().to_string()))
            }
        }
    }

    fn delete(&self, handle: &LocationHandle) -> DataResult<()> {
        match fs::remove_file(self.resolve(handle)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, handle: &LocationHandle) -> bool {
        self.resolve(handle).exists()
    }
}
