//! Append-only, signed, Merkle-verified block log.
//!
//! A [`Log`] is the storage primitive under both the metadata trie and the
//! file content of a drive. Every block is a leaf of a flat in-order Merkle
//! tree ([`flat`]); the writer signs the hash of the tree's roots on every
//! append. Replicas receive blocks together with [`BlockProof`]s and heads
//! with [`UpgradeProof`]s, and only store data that verifies against nodes
//! they already trust or against a valid signature.
//!
//! Replicas may be sparse: any subset of blocks can be present. A reader
//! asking for a missing block with [`GetOptions::wait`] registers a waiter,
//! which surfaces as a [`LogEvent::Want`] for replication sessions to act
//! on.

pub mod flat;

mod bitfield;
mod error;
mod header;
mod log;
mod node;
mod proof;
mod storage;

#[cfg(test)]
mod tests;

pub use error::LogError;
pub use log::{Applied, GetOptions, Head, Log, LogEvent, LogOptions};
pub use node::{Node, leaf_hash, parent_hash, signable, tree_hash};
pub use proof::{BlockProof, Download, UpgradeProof, upgrade_nodes, verify};
