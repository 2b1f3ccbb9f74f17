//! Content store over the content log.

use std::pin::Pin;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_lite::Stream;
use futures_lite::stream;
use reef_log::{GetOptions, Log};
use tokio::io::AsyncRead;
use tracing::debug;

use crate::chunker::Chunker;
use crate::error::ContentError;

type Result<T> = std::result::Result<T, ContentError>;

/// Blocks appended per signed head when writing from a reader.
const STREAM_BATCH: usize = 16;

/// Lazily produced content chunks; an error is always the last item.
pub type ContentStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Where a written payload lives in the content log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentRange {
    /// Absolute byte offset of the first byte.
    pub byte_offset: u64,
    /// Payload size in bytes.
    pub length: u64,
    /// Index of the first block.
    pub block_offset: u64,
    /// Number of blocks.
    pub blocks: u64,
}

/// Appends file bytes to the content log and reads byte ranges back.
pub struct ContentStore {
    log: Arc<Log>,
    chunker: Chunker,
    read_options: GetOptions,
}

impl ContentStore {
    /// Wrap a content log. `read_options` decides whether reads of missing
    /// blocks wait for replication or fail immediately.
    pub fn new(log: Arc<Log>, block_size: usize, read_options: GetOptions) -> Self {
        Self {
            log,
            chunker: Chunker::new(block_size),
            read_options,
        }
    }

    pub fn log(&self) -> &Arc<Log> {
        &self.log
    }

    pub fn block_size(&self) -> usize {
        self.chunker.block_size()
    }

    /// Append `data` as one or more blocks and return its range.
    pub async fn write(&self, data: impl Into<Bytes>) -> Result<ContentRange> {
        let data = data.into();
        let blocks = self.chunker.chunk(&data);
        let block_offset = self.log.append_batch(&blocks).await?;
        self.range_of(block_offset, blocks.len() as u64, data.len() as u64)
            .await
    }

    /// Append everything `reader` yields, in bounded batches.
    ///
    /// The payload is contiguous only if nothing else appends to the log
    /// concurrently; callers serialize writers.
    pub async fn write_reader(&self, mut reader: impl AsyncRead + Unpin) -> Result<ContentRange> {
        let mut block_offset = None;
        let mut blocks = 0u64;
        let mut length = 0u64;
        let mut batch = Vec::with_capacity(STREAM_BATCH);

        loop {
            let next = self.chunker.next_block(&mut reader).await?;
            let done = next.is_none();
            if let Some(block) = next {
                length += block.len() as u64;
                batch.push(block);
            }

            if batch.len() == STREAM_BATCH || (done && !batch.is_empty()) {
                let first = self.log.append_batch(&batch).await?;
                block_offset.get_or_insert(first);
                blocks += batch.len() as u64;
                batch.clear();
            }

            if done {
                break;
            }
        }

        let block_offset = block_offset.unwrap_or_else(|| self.log.length());
        self.range_of(block_offset, blocks, length).await
    }

    async fn range_of(&self, block_offset: u64, blocks: u64, length: u64) -> Result<ContentRange> {
        let byte_offset = self
            .log
            .byte_offset(block_offset, GetOptions::local())
            .await?;

        debug!(block_offset, blocks, byte_offset, length, "wrote content");
        Ok(ContentRange {
            byte_offset,
            length,
            block_offset,
            blocks,
        })
    }

    /// Read `length` bytes starting at absolute `offset`.
    pub async fn read(&self, offset: u64, length: u64) -> Result<Bytes> {
        if length == 0 {
            return Ok(Bytes::new());
        }
        self.check_bounds(offset, length)?;

        let (mut index, mut skip) = self.log.seek(offset, self.read_options).await?;
        let mut remaining = length as usize;

        let first = self.log.get_with(index, self.read_options).await?;
        if first.len() - skip as usize >= remaining {
            let start = skip as usize;
            return Ok(first.slice(start..start + remaining));
        }

        let mut out = BytesMut::with_capacity(remaining);
        let mut block = first;
        loop {
            let start = (skip as usize).min(block.len());
            let take = (block.len() - start).min(remaining);
            out.extend_from_slice(&block[start..start + take]);
            remaining -= take;

            if remaining == 0 {
                return Ok(out.freeze());
            }
            index += 1;
            skip = 0;
            block = self.log.get_with(index, self.read_options).await?;
        }
    }

    /// Read part of a previously written range. `length` of `None` reads
    /// to the end of the range.
    pub async fn read_range(&self, range: &ContentRange, start: u64, length: Option<u64>) -> Result<Bytes> {
        let (offset, length) = clamp(range, start, length);
        self.read(offset, length).await
    }

    /// Stream part of a range block by block.
    pub fn stream_range(&self, range: &ContentRange, start: u64, length: Option<u64>) -> ContentStream {
        let (offset, length) = clamp(range, start, length);
        self.stream(offset, length)
    }

    /// Stream `length` bytes from `offset`, one block-sized chunk at a time.
    ///
    /// Nothing is fetched until the stream is polled.
    pub fn stream(&self, offset: u64, length: u64) -> ContentStream {
        let state = StreamState {
            log: self.log.clone(),
            options: self.read_options,
            position: offset,
            remaining: length,
            next: None,
            finished: false,
        };

        Box::pin(stream::unfold(state, |mut state| async move {
            if state.finished || state.remaining == 0 {
                return None;
            }
            match state.step().await {
                Ok(chunk) => Some((Ok(chunk), state)),
                Err(e) => {
                    state.finished = true;
                    Some((Err(e), state))
                }
            }
        }))
    }

    /// Fetch every missing block of `range` without reading it back.
    pub async fn download(&self, range: &ContentRange) -> Result<()> {
        let end = range.block_offset + range.blocks;
        for index in self.log.missing_in(range.block_offset, end) {
            self.log.get_with(index, self.read_options).await?;
        }
        Ok(())
    }

    fn check_bounds(&self, offset: u64, length: u64) -> Result<()> {
        let byte_length = self.log.byte_length();
        if offset.checked_add(length).is_none_or(|end| end > byte_length) {
            return Err(ContentError::OutOfRange {
                offset,
                length,
                byte_length,
            });
        }
        Ok(())
    }
}

fn clamp(range: &ContentRange, start: u64, length: Option<u64>) -> (u64, u64) {
    let start = start.min(range.length);
    let available = range.length - start;
    let length = length.map_or(available, |l| l.min(available));
    (range.byte_offset + start, length)
}

struct StreamState {
    log: Arc<Log>,
    options: GetOptions,
    position: u64,
    remaining: u64,
    /// Next block index once the first block has been located.
    next: Option<u64>,
    finished: bool,
}

impl StreamState {
    async fn step(&mut self) -> Result<Bytes> {
        let (index, skip) = match self.next {
            Some(index) => (index, 0),
            None => {
                let byte_length = self.log.byte_length();
                if self.position.saturating_add(self.remaining) > byte_length {
                    return Err(ContentError::OutOfRange {
                        offset: self.position,
                        length: self.remaining,
                        byte_length,
                    });
                }
                self.log.seek(self.position, self.options).await?
            }
        };

        let block = self.log.get_with(index, self.options).await?;
        let start = (skip as usize).min(block.len());
        let take = ((block.len() - start) as u64).min(self.remaining) as usize;

        self.remaining -= take as u64;
        self.position += take as u64;
        self.next = Some(index + 1);
        Ok(block.slice(start..start + take))
    }
}
