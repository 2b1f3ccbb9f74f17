//! Drive configuration.
//!
//! Every field is optional in TOML; missing fields take the defaults below.
//!
//! ```toml
//! secret_key = "9f1c..."   # 64 hex chars; makes the drive writable
//! sparse = true
//! tree_cache_size = 0      # disable the trie node cache
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use reef_types::{Keypair, PublicKey, decode_hex32};
use serde::Deserialize;

use crate::error::DriveError;

/// Default block cache capacity of each log, in entries.
pub const DEFAULT_STORAGE_CACHE_SIZE: usize = 65_536;

/// Default trie node cache capacity, in nodes.
pub const DEFAULT_TREE_CACHE_SIZE: usize = 16_384;

/// Default content block size: 64 KiB.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Default bound on waiting for a sparse block.
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 30_000;

/// Options fixed when a drive is opened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Hex secret key. Present on the writer only.
    pub secret_key: Option<String>,
    /// Hex public key of the drive. Derived from `secret_key` when absent;
    /// a fresh keypair is generated when both are absent.
    pub public_key: Option<String>,
    /// Fetch content blocks only when read.
    pub sparse: bool,
    /// Fetch metadata blocks only when read.
    pub sparse_metadata: bool,
    /// Metadata log block cache, in entries. 0 disables it.
    pub metadata_storage_cache_size: Option<usize>,
    /// Content log block cache, in entries. 0 disables it.
    pub content_storage_cache_size: Option<usize>,
    /// Trie node cache, in nodes. 0 disables it.
    pub tree_cache_size: Option<usize>,
    /// Bytes per content block for new writes.
    pub content_block_size: Option<usize>,
    /// Milliseconds a read waits for a missing block before failing.
    pub fetch_timeout_ms: Option<u64>,
}

impl DriveConfig {
    /// Config for a writable drive owned by `keypair`.
    pub fn writable(keypair: &Keypair) -> Self {
        Self {
            secret_key: Some(hex::encode(keypair.secret_bytes())),
            ..Self::default()
        }
    }

    /// Config for a read-only replica of the drive `key`.
    pub fn replica(key: &PublicKey) -> Self {
        Self {
            public_key: Some(key.to_string()),
            ..Self::default()
        }
    }

    /// Parse config from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, DriveError> {
        toml::from_str(s).map_err(|e| DriveError::Config(e.to_string()))
    }

    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, DriveError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Resolve the drive key and, for a writer, its keypair.
    pub fn resolve_keys(&self) -> Result<(PublicKey, Option<Keypair>), DriveError> {
        let public = self
            .public_key
            .as_deref()
            .map(PublicKey::from_str)
            .transpose()?;
        let keypair = self
            .secret_key
            .as_deref()
            .map(|hex| decode_hex32(hex).map(|secret| Keypair::from_secret_bytes(&secret)))
            .transpose()?;

        match (public, keypair) {
            (Some(public), Some(keypair)) if keypair.public_key() != public => Err(
                DriveError::Config(format!("secret key does not belong to drive {public}")),
            ),
            (_, Some(keypair)) => Ok((keypair.public_key(), Some(keypair))),
            (Some(public), None) => Ok((public, None)),
            (None, None) => {
                let keypair = Keypair::generate();
                Ok((keypair.public_key(), Some(keypair)))
            }
        }
    }

    /// Effective metadata block cache size.
    pub fn metadata_storage_cache_size(&self) -> usize {
        self.metadata_storage_cache_size
            .unwrap_or(DEFAULT_STORAGE_CACHE_SIZE)
    }

    /// Effective content block cache size.
    pub fn content_storage_cache_size(&self) -> usize {
        self.content_storage_cache_size
            .unwrap_or(DEFAULT_STORAGE_CACHE_SIZE)
    }

    /// Effective trie node cache size.
    pub fn tree_cache_size(&self) -> usize {
        self.tree_cache_size.unwrap_or(DEFAULT_TREE_CACHE_SIZE)
    }

    /// Effective content block size (at least one byte).
    pub fn content_block_size(&self) -> usize {
        self.content_block_size.unwrap_or(DEFAULT_BLOCK_SIZE).max(1)
    }

    /// Effective fetch timeout.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms.unwrap_or(DEFAULT_FETCH_TIMEOUT_MS))
    }

    /// Set every cache size at once.
    pub fn with_cache_sizes(mut self, size: Option<usize>) -> Self {
        self.metadata_storage_cache_size = size;
        self.content_storage_cache_size = size;
        self.tree_cache_size = size;
        self
    }
}
