//! Merkle tree nodes and the hashes that bind them.

use serde::{Deserialize, Serialize};

use crate::flat;

/// Size in bytes of a persisted node slot: 32-byte hash + 8-byte size.
pub const NODE_SIZE: u64 = 40;

const LEAF_TYPE: u8 = 0x00;
const PARENT_TYPE: u8 = 0x01;
const ROOT_TYPE: u8 = 0x02;

/// One node of the Merkle tree.
///
/// `size` is the number of data bytes under the node, so byte offsets can
/// be resolved by walking the tree without touching block data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    /// Flat-tree index.
    pub index: u64,
    /// Node hash.
    pub hash: [u8; 32],
    /// Bytes covered by the node.
    pub size: u64,
}

impl Node {
    /// Leaf node for block `block` holding `data`.
    pub fn leaf(block: u64, data: &[u8]) -> Self {
        Self {
            index: block * 2,
            hash: leaf_hash(data),
            size: data.len() as u64,
        }
    }

    /// Parent of two sibling nodes, given in either order.
    pub fn parent(a: &Node, b: &Node) -> Self {
        let (left, right) = if a.index < b.index { (a, b) } else { (b, a) };
        Self {
            index: flat::parent(left.index),
            hash: parent_hash(left, right),
            size: left.size + right.size,
        }
    }

    /// Encode to a fixed-size slot.
    pub fn encode(&self) -> [u8; NODE_SIZE as usize] {
        let mut buf = [0u8; NODE_SIZE as usize];
        buf[..32].copy_from_slice(&self.hash);
        buf[32..].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    /// Decode a slot. An all-zero hash marks an empty slot.
    pub fn decode(index: u64, slot: &[u8]) -> Option<Self> {
        if slot.len() < NODE_SIZE as usize {
            return None;
        }

        let mut hash = [0u8; 32];
        hash.copy_from_slice(&slot[..32]);
        if hash == [0u8; 32] {
            return None;
        }

        let mut size = [0u8; 8];
        size.copy_from_slice(&slot[32..40]);
        Some(Self {
            index,
            hash,
            size: u64::from_le_bytes(size),
        })
    }
}

/// Hash of a block's bytes.
pub fn leaf_hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[LEAF_TYPE]);
    hasher.update(&(data.len() as u64).to_le_bytes());
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash of a parent over its two children.
pub fn parent_hash(left: &Node, right: &Node) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[PARENT_TYPE]);
    hasher.update(&(left.size + right.size).to_le_bytes());
    hasher.update(&left.hash);
    hasher.update(&right.hash);
    hasher.finalize().into()
}

/// Hash over all roots of a tree, identifying its whole content.
pub fn tree_hash(roots: &[Node]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[ROOT_TYPE]);
    for root in roots {
        hasher.update(&root.hash);
        hasher.update(&root.index.to_le_bytes());
        hasher.update(&root.size.to_le_bytes());
    }
    hasher.finalize().into()
}

/// The message signed for a head of `length` blocks.
pub fn signable(namespace: &[u8], tree_hash: &[u8; 32], length: u64) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(namespace);
    hasher.update(tree_hash);
    hasher.update(&length.to_le_bytes());
    hasher.finalize().into()
}
