//! Core trait for seekable byte storage.

use bytes::Bytes;

use crate::error::StoreError;

/// A seekable, growable byte store.
///
/// All implementations must be `Send + Sync` for use across async tasks.
/// Writes past the current end grow the store; the gap reads back as zeros.
#[async_trait::async_trait]
pub trait RandomAccess: Send + Sync {
    /// Read exactly `len` bytes at `offset`.
    ///
    /// Fails with [`StoreError::OutOfBounds`] if the range extends past the end.
    async fn read(&self, offset: u64, len: u64) -> Result<Bytes, StoreError>;

    /// Write `data` at `offset`, growing the store if needed.
    async fn write(&self, offset: u64, data: &[u8]) -> Result<(), StoreError>;

    /// Current size in bytes.
    async fn len(&self) -> Result<u64, StoreError>;

    /// Shrink or grow the store to exactly `len` bytes.
    async fn truncate(&self, len: u64) -> Result<(), StoreError>;

    /// Flush buffered writes to durable storage.
    async fn sync(&self) -> Result<(), StoreError>;

    /// Whether the store holds no bytes.
    async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }

    /// Read `len` bytes at `offset`, or `None` if the range is past the end.
    async fn try_read(&self, offset: u64, len: u64) -> Result<Option<Bytes>, StoreError> {
        if offset.saturating_add(len) > self.len().await? {
            return Ok(None);
        }
        self.read(offset, len).await.map(Some)
    }
}
