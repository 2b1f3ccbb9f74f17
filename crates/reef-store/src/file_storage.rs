//! File-based storage backend.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::traits::RandomAccess;

/// Byte store backed by a single file.
///
/// The file handle is guarded by an async mutex because every operation is a
/// seek followed by a read or write on the shared cursor.
pub struct FileStorage {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileStorage {
    /// Open (or create) the file at `path`, creating parent directories.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;

        debug!(path = %path.display(), "opened file storage");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl RandomAccess for FileStorage {
    async fn read(&self, offset: u64, len: u64) -> Result<Bytes, StoreError> {
        let mut file = self.file.lock().await;
        let size = file.metadata().await?.len();

        if offset.saturating_add(len) > size {
            return Err(StoreError::OutOfBounds { offset, len, size });
        }

        let mut buf = vec![0u8; len as usize];
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn write(&self, offset: u64, data: &[u8]) -> Result<(), StoreError> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn len(&self) -> Result<u64, StoreError> {
        let file = self.file.lock().await;
        Ok(file.metadata().await?.len())
    }

    async fn truncate(&self, len: u64) -> Result<(), StoreError> {
        let file = self.file.lock().await;
        file.set_len(len).await?;
        Ok(())
    }

    async fn sync(&self) -> Result<(), StoreError> {
        let file = self.file.lock().await;
        file.sync_data().await?;
        Ok(())
    }
}
