//! Error types for the content crate.

use reef_log::LogError;

/// Errors that can occur during content operations.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    /// Requested bytes extend past the end of the content log.
    #[error("range {offset}+{length} is past the end of content ({byte_length} bytes)")]
    OutOfRange {
        offset: u64,
        length: u64,
        byte_length: u64,
    },

    /// Underlying log error.
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// Reading input failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
