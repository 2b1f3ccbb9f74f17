//! Error types for replication.

use reef_log::LogError;

/// Errors that end a replication session.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Transport read or write failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A frame exceeded the size limit.
    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// The peer broke the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A frame failed authenticated decryption.
    #[error("decryption failed for frame {counter}")]
    Decrypt { counter: u64 },

    /// The local log rejected peer data or failed.
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// The transport closed before the handshake completed.
    #[error("connection closed")]
    Closed,

    /// The session task panicked or was aborted.
    #[error("session task failed: {0}")]
    Task(String),
}

impl NetError {
    /// The peer sent data that failed verification.
    pub fn is_integrity(&self) -> bool {
        match self {
            Self::Log(e) => e.is_integrity(),
            Self::Decrypt { .. } => true,
            _ => false,
        }
    }

    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::FrameTooLarge { .. } | Self::Serialization(_)
        )
    }
}

impl From<postcard::Error> for NetError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
