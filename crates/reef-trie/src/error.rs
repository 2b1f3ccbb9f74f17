//! Error types for the trie crate.

use reef_log::LogError;

/// Errors that can occur during trie operations.
#[derive(Debug, thiserror::Error)]
pub enum TrieError {
    /// The path cannot name an entry.
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    /// No entry exists at the path.
    #[error("no entry at {0}")]
    NotFound(String),

    /// Writes are not allowed on a historical checkout.
    #[error("checkout at version {0} is read-only")]
    ReadOnlyCheckout(u64),

    /// Requested version is newer than the log.
    #[error("version {version} is beyond the current version {current}")]
    VersionOutOfRange { version: u64, current: u64 },

    /// A stored node could not be decoded or is inconsistent.
    #[error("corrupt trie node {seq}: {reason}")]
    CorruptNode { seq: u64, reason: String },

    /// Underlying log error.
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<postcard::Error> for TrieError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
