//! File content addressed by absolute byte ranges.
//!
//! This crate provides:
//! - [`Chunker`]: splits bytes into fixed-size log blocks.
//! - [`ContentStore`]: appends file bytes to the content [`Log`] and reads
//!   any byte range back, fetching missing blocks through the log's wait
//!   path on sparse replicas.
//!
//! Callers address content by byte offset, never by block index, so the
//! block size is an internal choice that does not affect results.
//!
//! [`Log`]: reef_log::Log

mod chunker;
mod error;
mod store;

pub use chunker::Chunker;
pub use error::ContentError;
pub use store::{ContentRange, ContentStore, ContentStream};
