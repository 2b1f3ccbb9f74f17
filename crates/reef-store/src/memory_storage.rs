//! In-memory storage backend.

use std::sync::RwLock;

use bytes::Bytes;

use crate::error::StoreError;
use crate::traits::RandomAccess;

/// In-memory byte store backed by a `RwLock<Vec<u8>>`.
///
/// Useful for testing and for drives that do not need to survive a restart.
#[derive(Default)]
pub struct MemoryStorage {
    buf: RwLock<Vec<u8>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a reference to the inner buffer (for testing purposes).
    #[cfg(test)]
    pub(crate) fn inner(&self) -> &RwLock<Vec<u8>> {
        &self.buf
    }
}

#[async_trait::async_trait]
impl RandomAccess for MemoryStorage {
    async fn read(&self, offset: u64, len: u64) -> Result<Bytes, StoreError> {
        let buf = self.buf.read().expect("lock poisoned");
        let size = buf.len() as u64;
        let end = offset.saturating_add(len);

        if end > size {
            return Err(StoreError::OutOfBounds { offset, len, size });
        }

        Ok(Bytes::copy_from_slice(&buf[offset as usize..end as usize]))
    }

    async fn write(&self, offset: u64, data: &[u8]) -> Result<(), StoreError> {
        let mut buf = self.buf.write().expect("lock poisoned");
        let start = offset as usize;
        let end = start + data.len();

        if end > buf.len() {
            buf.resize(end, 0);
        }
        buf[start..end].copy_from_slice(data);
        Ok(())
    }

    async fn len(&self) -> Result<u64, StoreError> {
        Ok(self.buf.read().expect("lock poisoned").len() as u64)
    }

    async fn truncate(&self, len: u64) -> Result<(), StoreError> {
        self.buf
            .write()
            .expect("lock poisoned")
            .resize(len as usize, 0);
        Ok(())
    }

    async fn sync(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
