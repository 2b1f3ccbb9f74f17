//! Trie node and drive header records.

use reef_types::Stat;
use serde::{Deserialize, Serialize};

use crate::error::TrieError;
use crate::path;

/// Protocol tag written in block 0 of every metadata log.
pub const PROTOCOL: &str = "reef/drive/1";

/// First record of the metadata log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveHeader {
    pub protocol: String,
}

impl Default for DriveHeader {
    fn default() -> Self {
        Self {
            protocol: PROTOCOL.to_string(),
        }
    }
}

impl DriveHeader {
    pub fn encode(&self) -> Result<Vec<u8>, TrieError> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TrieError> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// Pointers leaving one digit position of a node's hash path.
///
/// `targets[(d, seq)]` names the newest node older than this one whose
/// hash path agrees with this node's up to `position` and has digit `d`
/// there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerRow {
    pub position: u32,
    pub targets: Vec<(u8, u64)>,
}

impl PointerRow {
    pub fn get(&self, digit: u8) -> Option<u64> {
        self.targets
            .iter()
            .find(|(d, _)| *d == digit)
            .map(|(_, seq)| *seq)
    }
}

/// One trie entry. A `None` value is a tombstone left by a delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrieNode {
    pub key: String,
    pub value: Option<Stat>,
    /// Rows sorted by ascending position.
    pub pointers: Vec<PointerRow>,
    #[serde(skip)]
    hash: Vec<u8>,
}

impl TrieNode {
    pub fn new(key: String, value: Option<Stat>, pointers: Vec<PointerRow>) -> Self {
        let hash = hash_of(&key);
        Self {
            key,
            value,
            pointers,
            hash,
        }
    }

    /// Digits of this node's hash path.
    pub fn hash(&self) -> &[u8] {
        &self.hash
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Pointer row at `position`, if any.
    pub fn row(&self, position: usize) -> Option<&PointerRow> {
        self.pointers
            .binary_search_by_key(&position, |row| row.position as usize)
            .ok()
            .map(|i| &self.pointers[i])
    }

    pub fn pointer(&self, position: usize, digit: u8) -> Option<u64> {
        self.row(position).and_then(|row| row.get(digit))
    }

    pub fn encode(&self) -> Result<Vec<u8>, TrieError> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Decode the node stored at `seq`, checking that every pointer
    /// refers to an older node.
    pub fn decode(seq: u64, bytes: &[u8]) -> Result<Self, TrieError> {
        let mut node: TrieNode = postcard::from_bytes(bytes).map_err(|e| TrieError::CorruptNode {
            seq,
            reason: e.to_string(),
        })?;
        if node.key.is_empty() || node.key.split('/').any(|s| s.is_empty()) {
            return Err(TrieError::CorruptNode {
                seq,
                reason: format!("bad key {:?}", node.key),
            });
        }
        let sorted = node.pointers.windows(2).all(|w| w[0].position < w[1].position);
        let backwards = node
            .pointers
            .iter()
            .flat_map(|row| row.targets.iter())
            .all(|(digit, target)| *target < seq && *target > 0 && *digit <= path::END);
        if !sorted || !backwards {
            return Err(TrieError::CorruptNode {
                seq,
                reason: "malformed pointer table".into(),
            });
        }
        node.hash = hash_of(&node.key);
        Ok(node)
    }
}

fn hash_of(key: &str) -> Vec<u8> {
    let segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
    path::hash_path(&segments)
}
