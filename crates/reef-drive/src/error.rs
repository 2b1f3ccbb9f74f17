//! Error types for drive operations.
//!
//! Lower-level errors are folded into the drive taxonomy on conversion, so
//! callers can match on [`DriveError::NotFound`], [`DriveError::NotWritable`],
//! [`DriveError::MissingBlock`], [`DriveError::Timeout`],
//! [`DriveError::Integrity`] and [`DriveError::Protocol`] regardless of which
//! layer produced them.

use reef_content::ContentError;
use reef_log::LogError;
use reef_net::NetError;
use reef_trie::TrieError;
use reef_types::KeyError;

/// Errors that can occur during drive operations.
#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    /// No file or directory at the path.
    #[error("no such file or directory: {0}")]
    NotFound(String),

    /// The path names a file where a directory was expected.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// The path cannot name an entry.
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    /// The drive has no secret key, or is a historical checkout.
    #[error("drive is not writable")]
    NotWritable,

    /// A block is not stored locally and fetching was not allowed.
    #[error("block {0} is not available locally")]
    MissingBlock(u64),

    /// A sparse fetch did not complete in time.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// Peer data failed verification.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// A replication peer broke the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Requested bytes lie outside the file.
    #[error("range {start}+{length} is outside a file of {size} bytes")]
    OutOfRange { start: u64, length: u64, size: u64 },

    /// File contents are not valid UTF-8.
    #[error("file is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    /// Bad configuration or key material.
    #[error("config error: {0}")]
    Config(String),

    #[error("key error: {0}")]
    Key(#[from] KeyError),

    /// Other log failures (storage, corruption).
    #[error("log error: {0}")]
    Log(LogError),

    #[error("trie error: {0}")]
    Trie(TrieError),

    #[error("replication error: {0}")]
    Net(NetError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_not_writable(&self) -> bool {
        matches!(self, Self::NotWritable)
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// A block could not be obtained, locally or in time.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::MissingBlock(_) | Self::Timeout(_))
    }
}

impl From<LogError> for DriveError {
    fn from(e: LogError) -> Self {
        match e {
            LogError::NotWritable => Self::NotWritable,
            LogError::MissingBlock(index) => Self::MissingBlock(index),
            LogError::Timeout(index) => Self::Timeout(format!("block {index}")),
            e if e.is_integrity() => Self::Integrity(e.to_string()),
            e => Self::Log(e),
        }
    }
}

impl From<ContentError> for DriveError {
    fn from(e: ContentError) -> Self {
        match e {
            ContentError::Log(e) => e.into(),
            ContentError::Io(e) => Self::Io(e),
            ContentError::OutOfRange {
                offset,
                length,
                byte_length,
            } => Self::OutOfRange {
                start: offset,
                length,
                size: byte_length,
            },
        }
    }
}

impl From<TrieError> for DriveError {
    fn from(e: TrieError) -> Self {
        match e {
            TrieError::NotFound(path) => Self::NotFound(path),
            TrieError::InvalidPath(path) => Self::InvalidPath(path),
            TrieError::ReadOnlyCheckout(_) => Self::NotWritable,
            TrieError::Log(e) => e.into(),
            e => Self::Trie(e),
        }
    }
}

impl From<NetError> for DriveError {
    fn from(e: NetError) -> Self {
        match e {
            NetError::Log(e) => e.into(),
            e if e.is_integrity() => Self::Integrity(e.to_string()),
            e if e.is_protocol() => Self::Protocol(e.to_string()),
            e => Self::Net(e),
        }
    }
}
