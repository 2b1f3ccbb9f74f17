//! Path-keyed trie stored as blocks of the metadata log.
//!
//! Each `put` appends one [`TrieNode`] holding the full normalized path,
//! its [`Stat`](reef_types::Stat) and a table of pointers to older nodes.
//! Paths are hashed segment by segment into base-4 digit strings
//! ([`path::hash_path`]) so that every directory is a digit prefix of its
//! descendants. Lookups and directory walks follow pointers from the newest
//! node, reading O(depth) nodes instead of scanning the log.
//!
//! Block 0 of the metadata log is a [`DriveHeader`]; trie nodes start at
//! seq 1.

pub mod path;

mod error;
mod iter;
mod node;
mod trie;

#[cfg(test)]
mod tests;

pub use error::TrieError;
pub use iter::{ChildStream, EntryStream, TrieEntry};
pub use node::{DriveHeader, PointerRow, TrieNode};
pub use trie::Trie;
