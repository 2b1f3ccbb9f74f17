//! Proof records exchanged between replicas.
//!
//! A [`BlockProof`] carries one block plus the sibling hashes from its leaf
//! up to a root. An [`UpgradeProof`] carries a signed head together with the
//! nodes a receiver needs to recompute that head's roots from what it
//! already trusts. A [`Download`] bundles both so a replica can learn a new
//! length and a block of it in one message.

use bytes::Bytes;
use reef_types::join_signature;
use serde::{Deserialize, Serialize};

use crate::flat;
use crate::node::Node;

/// A block and the sibling hashes proving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockProof {
    pub index: u64,
    pub value: Bytes,
    /// Siblings from the leaf upwards, stopping below the covering root.
    pub nodes: Vec<Node>,
}

impl BlockProof {
    /// Check this proof against an expected root.
    pub fn verify(&self, root: &Node) -> bool {
        verify(&self.value, self.index, &self.nodes, root)
    }
}

/// A signed head plus the nodes needed to rebuild its roots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeProof {
    pub length: u64,
    pub nodes: Vec<Node>,
    pub signature_r: [u8; 32],
    pub signature_s: [u8; 32],
}

impl UpgradeProof {
    pub fn signature(&self) -> [u8; 64] {
        join_signature(&self.signature_r, &self.signature_s)
    }
}

/// Response to a block or head request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Download {
    pub block: Option<BlockProof>,
    pub upgrade: Option<UpgradeProof>,
}

/// Verify `block` at `index` against `root` using sibling `nodes`.
///
/// Pure: recomputes the path from the leaf and compares the node reached
/// at the root's index with `root`.
pub fn verify(block: &[u8], index: u64, nodes: &[Node], root: &Node) -> bool {
    let mut node = Node::leaf(index, block);
    let mut siblings = nodes.iter();

    while node.index != root.index {
        let Some(sibling) = siblings.next() else {
            return false;
        };
        if sibling.index != flat::sibling(node.index) {
            return false;
        }
        node = Node::parent(&node, sibling);
    }

    siblings.next().is_none() && node == *root
}

/// Flat indexes of the nodes an upgrade from `from` to `to` must carry.
///
/// Descends from every root of `to`: subtrees that are roots of `from` are
/// already known to the receiver and skipped, subtrees lying entirely at or
/// beyond `from` are sent whole, and anything straddling `from` is split.
/// When the receiver is not behind (`from >= to`) the roots themselves are
/// sent, since it may not hold the roots of a shorter tree.
pub fn upgrade_nodes(from: u64, to: u64) -> Vec<u64> {
    if from >= to {
        return flat::full_roots(to);
    }

    let known = flat::full_roots(from);
    let mut stack: Vec<u64> = flat::full_roots(to).into_iter().rev().collect();
    let mut nodes = Vec::new();

    while let Some(index) = stack.pop() {
        if known.contains(&index) {
            continue;
        }
        if flat::left_span(index) / 2 >= from {
            nodes.push(index);
        } else if let Some((left, right)) = flat::children(index) {
            stack.push(right);
            stack.push(left);
        }
    }

    nodes
}
