//! Peer-replicated, versioned file store.
//!
//! A [`Drive`] is identified by a public key. File metadata lives in a
//! path trie stored in the drive's metadata log, and file bytes live in its
//! content log. Only the holder of the secret key can write. Any peer with
//! the public key can [`Drive::replicate`] and verify both logs, fully or
//! sparsely, once or live.
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> Result<(), reef_drive::DriveError> {
//! use reef_drive::{Drive, DriveConfig, WriteOptions};
//! use reef_store::MemoryProvider;
//!
//! let provider = MemoryProvider::new();
//! let drive = Drive::open(&provider, DriveConfig::default()).await?;
//! drive.write_file("/hello.txt", "hello", WriteOptions::default()).await?;
//! assert_eq!(drive.read_file_to_string("/hello.txt").await?, "hello");
//! # Ok(())
//! # }
//! ```

mod config;
mod drive;
mod error;
mod options;

#[cfg(test)]
mod tests;

pub use config::{
    DEFAULT_BLOCK_SIZE, DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_STORAGE_CACHE_SIZE,
    DEFAULT_TREE_CACHE_SIZE, DriveConfig,
};
pub use drive::{DirectoryStream, Drive, FileStream};
pub use error::DriveError;
pub use options::{DirEntry, ReadStreamOptions, WriteOptions};
pub use reef_net::{ReplicateOptions, ReplicationHandle, SessionState, SessionStats};
pub use reef_types::{EntryKind, Keypair, PublicKey, Stat};
