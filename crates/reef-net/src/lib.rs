//! Replication protocol for reef drives.
//!
//! A session synchronizes a drive's metadata and content logs with one
//! peer over any duplex byte stream:
//!
//! - [`Hello`] handshake: both sides prove they replicate the same drive
//!   (by discovery key) and agree on encryption.
//! - [`WireMessage`]s in 4-byte length-prefixed postcard frames, sealed with
//!   AES-256-GCM when encryption is on.
//! - Requests paced by `max_inflight`; every received block and head is
//!   verified by the log before it is stored.
//!
//! The session never signs anything. It can grow a log only through
//! [`Log::apply_download`](reef_log::Log::apply_download).

mod channel;
mod crypto;
mod error;
mod framing;
mod message;
mod ranges;
mod session;
mod transport;

#[cfg(test)]
mod tests;

pub use error::NetError;
pub use framing::MAX_FRAME_SIZE;
pub use message::{Channel, Hello, PROTOCOL, WireMessage};
pub use session::{
    Feed, ReplicateOptions, ReplicationHandle, SessionState, SessionStats, replicate,
};
