//! Random-access storage trait and backend implementations.
//!
//! Every reef log persists its tree, data, bitfield and header into separate
//! seekable byte stores. This crate defines the [`RandomAccess`] trait for a
//! single store and the [`StorageProvider`] trait that opens stores by name,
//! along with three backends:
//!
//! - [`MemoryStorage`]: a growable in-memory buffer.
//! - [`FileStorage`]: one file per store under a directory.
//! - [`SlowStorage`]: a wrapper injecting random latency for tests.

mod error;
mod file_storage;
mod memory_storage;
mod provider;
mod slow_storage;
mod traits;

pub use error::StoreError;
pub use file_storage::FileStorage;
pub use memory_storage::MemoryStorage;
pub use provider::{DirectoryProvider, MemoryProvider, SlowProvider, StorageProvider};
pub use slow_storage::{Latency, SlowStorage};
pub use traits::RandomAccess;
