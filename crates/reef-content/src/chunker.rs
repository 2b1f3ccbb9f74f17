//! Fixed-size chunker for splitting file bytes into log blocks.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ContentError;

/// Fixed-size chunker that splits data into blocks of a configured size.
///
/// The last block may be smaller than `block_size`.
/// Empty data produces zero blocks.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    block_size: usize,
}

impl Chunker {
    /// Create a new chunker. A size of 0 is treated as 1.
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Split data into fixed-size blocks without copying.
    pub fn chunk(&self, data: &Bytes) -> Vec<Bytes> {
        let mut blocks = Vec::with_capacity(data.len().div_ceil(self.block_size));
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + self.block_size).min(data.len());
            blocks.push(data.slice(offset..end));
            offset = end;
        }
        blocks
    }

    /// Read the next full block from `reader`, or a shorter one at EOF.
    ///
    /// Returns `None` once the reader is exhausted.
    pub async fn next_block(
        &self,
        reader: &mut (impl AsyncRead + Unpin),
    ) -> Result<Option<Bytes>, ContentError> {
        let mut buf = vec![0u8; self.block_size];
        let mut filled = 0;

        // Read exactly block_size bytes, or until EOF.
        while filled < self.block_size {
            let n = reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(Bytes::from(buf)))
    }
}
