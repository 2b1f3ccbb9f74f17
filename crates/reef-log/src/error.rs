//! Error types for the log crate.

use reef_store::StoreError;
use reef_types::PublicKey;

/// Errors that can occur during log operations.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// Append attempted without the secret key.
    #[error("log is not writable")]
    NotWritable,

    /// The block is not stored locally and no fetch was allowed.
    #[error("block {0} is not available locally")]
    MissingBlock(u64),

    /// Waiting for a remote block took longer than allowed.
    #[error("timed out waiting for block {0}")]
    Timeout(u64),

    /// The log was dropped while waiting on it.
    #[error("log closed")]
    Closed,

    /// A tree node needed to answer the request is not stored locally.
    #[error("tree node {0} is not available locally")]
    MissingNode(u64),

    /// Index or byte offset past the end of the log.
    #[error("position {position} is out of range (length {length})")]
    OutOfRange { position: u64, length: u64 },

    /// A proof, hash or signature did not verify.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Storage was written by a different key.
    #[error("storage belongs to {found}, expected {expected}")]
    KeyMismatch {
        expected: PublicKey,
        found: PublicKey,
    },

    /// The persisted header is unreadable.
    #[error("corrupt header: {0}")]
    CorruptHeader(String),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<postcard::Error> for LogError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl LogError {
    /// Whether the error means data from a peer failed verification.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }
}
