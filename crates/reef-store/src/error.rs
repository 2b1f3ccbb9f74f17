//! Error types for storage operations.

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A read extended past the end of the store.
    #[error("read out of bounds: offset {offset} + {len} bytes exceeds size {size}")]
    OutOfBounds {
        /// Requested start offset.
        offset: u64,
        /// Requested length.
        len: u64,
        /// Current size of the store.
        size: u64,
    },

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The store name cannot be mapped to a location.
    #[error("invalid store name: {0}")]
    InvalidName(String),
}
