//! Wire messages.
//!
//! Every message is postcard-encoded into one frame. The first frame in
//! each direction is a plaintext [`Hello`]; everything after it is a
//! [`WireMessage`], encrypted when both sides asked for encryption.

use reef_log::Download;
use reef_types::{DiscoveryKey, LogKind};
use serde::{Deserialize, Serialize};

/// Protocol identifier carried in [`Hello`].
pub const PROTOCOL: &str = "reef/replicate/1";

/// Opening message of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub protocol: String,
    /// Identifies the drive without revealing its key.
    pub discovery_key: DiscoveryKey,
    /// Random per-session salt for key derivation.
    pub nonce: [u8; 32],
    pub encrypted: bool,
}

/// Which of the drive's two logs a message concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Metadata,
    Content,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Metadata, Channel::Content];

    pub fn kind(self) -> LogKind {
        match self {
            Self::Metadata => LogKind::Metadata,
            Self::Content => LogKind::Content,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::Metadata => 0,
            Self::Content => 1,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind().fmt(f)
    }
}

/// Messages exchanged after the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireMessage {
    /// Sender's signed length plus `(start, length)` runs of blocks it
    /// stores. Runs add to what the receiver already knows.
    Sync {
        channel: Channel,
        length: u64,
        have: Vec<(u64, u64)>,
    },

    /// Sender now stores blocks `[start, start + length)`.
    Have {
        channel: Channel,
        start: u64,
        length: u64,
    },

    /// Ask for a block, a newer head, or both.
    Request {
        channel: Channel,
        id: u64,
        block: Option<u64>,
        /// Requester's trusted length; an upgrade starts from here.
        known_length: u64,
        /// Include a head upgrade if the responder is ahead.
        upgrade: bool,
    },

    /// Withdraw a request that has not been answered.
    Cancel { channel: Channel, id: u64 },

    /// Answer to a request, verified by the receiver before use.
    Data {
        channel: Channel,
        id: u64,
        download: Download,
    },

    /// The responder has nothing to send for this request.
    NoData { channel: Channel, id: u64 },

    /// Sender has nothing left to fetch.
    Idle,

    /// Sender is ending the session.
    Close,
}

impl WireMessage {
    pub fn encode(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}
