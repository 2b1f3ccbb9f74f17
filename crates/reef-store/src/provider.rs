//! Named store factories.
//!
//! A drive needs several stores per log (`metadata/tree`, `content/data`, ...).
//! A [`StorageProvider`] maps those names to concrete [`RandomAccess`] stores.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::StoreError;
use crate::file_storage::FileStorage;
use crate::memory_storage::MemoryStorage;
use crate::slow_storage::{Latency, SlowStorage};
use crate::traits::RandomAccess;

/// Opens named byte stores.
///
/// Opening the same name twice must return a store with the same contents,
/// so a drive can be closed and reopened over one provider.
#[async_trait::async_trait]
pub trait StorageProvider: Send + Sync {
    /// Open (or create) the store called `name`.
    async fn open(&self, name: &str) -> Result<Arc<dyn RandomAccess>, StoreError>;
}

/// Provider handing out [`MemoryStorage`] instances.
///
/// Stores are kept in a map so reopening a name yields the same buffer.
#[derive(Default)]
pub struct MemoryProvider {
    stores: Mutex<HashMap<String, Arc<MemoryStorage>>>,
}

impl MemoryProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of every store opened so far.
    pub fn names(&self) -> Vec<String> {
        let stores = self.stores.lock().expect("provider lock poisoned");
        let mut names: Vec<String> = stores.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait::async_trait]
impl StorageProvider for MemoryProvider {
    async fn open(&self, name: &str) -> Result<Arc<dyn RandomAccess>, StoreError> {
        let mut stores = self.stores.lock().expect("provider lock poisoned");
        let store = stores
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryStorage::new()))
            .clone();
        Ok(store)
    }
}

/// Provider storing each named store as a file under a root directory.
pub struct DirectoryProvider {
    root: PathBuf,
}

impl DirectoryProvider {
    /// Create a provider rooted at `root`. The directory is created lazily.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Map a store name to a path, rejecting names that escape the root.
    fn store_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));

        if name.is_empty() || escapes {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait::async_trait]
impl StorageProvider for DirectoryProvider {
    async fn open(&self, name: &str) -> Result<Arc<dyn RandomAccess>, StoreError> {
        let path = self.store_path(name)?;
        Ok(Arc::new(FileStorage::open(path).await?))
    }
}

/// Provider wrapping every store of an inner provider in [`SlowStorage`].
///
/// Each opened store gets its own RNG seeded from `seed` and the store name.
pub struct SlowProvider {
    inner: Arc<dyn StorageProvider>,
    read: Latency,
    write: Latency,
    seed: u64,
}

impl SlowProvider {
    /// Wrap `inner`, delaying reads by `read` and writes by `write`.
    pub fn new(inner: Arc<dyn StorageProvider>, read: Latency, write: Latency, seed: u64) -> Self {
        Self {
            inner,
            read,
            write,
            seed,
        }
    }
}

#[async_trait::async_trait]
impl StorageProvider for SlowProvider {
    async fn open(&self, name: &str) -> Result<Arc<dyn RandomAccess>, StoreError> {
        let inner = self.inner.open(name).await?;
        let name_seed = name
            .bytes()
            .fold(self.seed, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));

        Ok(Arc::new(SlowStorage::new(inner, self.read, self.write, name_seed)))
    }
}
