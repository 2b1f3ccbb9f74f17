//! Lazy walks over the trie.
//!
//! A walk starts at the newest node under a directory prefix and follows
//! every pointer row at or past the position where that node was entered.
//! Each pointer leads to the newest node of a disjoint digit prefix, so
//! every key below the directory is reached exactly once, at its newest
//! version. Only one node is decoded per step.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;

use futures_lite::Stream;
use futures_lite::stream;
use reef_types::Stat;

use crate::error::TrieError;
use crate::node::TrieNode;
use crate::path;
use crate::trie::Trie;

type Result<T> = std::result::Result<T, TrieError>;

/// A live entry produced by [`Trie::stream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrieEntry {
    /// Normalized path with a leading `/`.
    pub path: String,
    pub stat: Stat,
    /// Metadata seq of the node holding the entry.
    pub seq: u64,
}

pub type EntryStream = Pin<Box<dyn Stream<Item = Result<TrieEntry>> + Send>>;

pub type ChildStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

pub(crate) struct Walk {
    trie: Trie,
    dir: Vec<String>,
    prefix: Vec<u8>,
    /// Children mode: rows at or past this position of a live node lead to
    /// the same child and are skipped.
    limit: Option<usize>,
    stack: Vec<(u64, usize)>,
    seen: HashSet<String>,
    started: bool,
}

impl Walk {
    fn new(trie: Trie, dir: &[&str], children: bool) -> Self {
        let prefix = path::prefix_path(dir);
        let limit = children.then_some(prefix.len() + path::SEGMENT_DIGITS);
        Self {
            trie,
            dir: dir.iter().map(|s| s.to_string()).collect(),
            prefix,
            limit,
            stack: Vec::new(),
            seen: HashSet::new(),
            started: false,
        }
    }

    /// Every live entry below `dir`.
    pub(crate) fn entries(trie: Trie, dir: &[&str]) -> Self {
        Self::new(trie, dir, false)
    }

    /// Distinct immediate child names of `dir`.
    pub(crate) fn children(trie: Trie, dir: &[&str]) -> Self {
        Self::new(trie, dir, true)
    }

    async fn next_node(&mut self) -> Result<Option<(u64, Arc<TrieNode>)>> {
        if !self.started {
            self.started = true;
            if let Some(start) = self.trie.find_prefix(&self.prefix).await? {
                self.stack.push(start);
            }
        }
        let Some((seq, from)) = self.stack.pop() else {
            return Ok(None);
        };
        let node = self.trie.node(seq).await?;
        let end = match self.limit {
            Some(limit) if !node.is_tombstone() => limit,
            _ => usize::MAX,
        };
        for row in node.pointers.iter().rev() {
            let position = row.position as usize;
            if position < from || position >= end {
                continue;
            }
            for (_, target) in row.targets.iter().rev() {
                self.stack.push((*target, position + 1));
            }
        }
        Ok(Some((seq, node)))
    }

    /// Segments of `key` if it lies strictly below the walked directory.
    fn below<'a>(&self, key: &'a str) -> Option<Vec<&'a str>> {
        let segments: Vec<&str> = key.split('/').collect();
        let inside = segments.len() > self.dir.len()
            && self.dir.iter().zip(&segments).all(|(a, b)| a == b);
        inside.then_some(segments)
    }

    pub(crate) async fn next_entry(&mut self) -> Result<Option<TrieEntry>> {
        while let Some((seq, node)) = self.next_node().await? {
            let Some(stat) = node.value.clone() else {
                continue;
            };
            if self.below(&node.key).is_none() {
                continue;
            }
            return Ok(Some(TrieEntry {
                path: path::display(&node.key),
                stat,
                seq,
            }));
        }
        Ok(None)
    }

    pub(crate) async fn next_child(&mut self) -> Result<Option<String>> {
        while let Some((_, node)) = self.next_node().await? {
            if node.is_tombstone() {
                continue;
            }
            let Some(segments) = self.below(&node.key) else {
                continue;
            };
            let name = segments[self.dir.len()].to_string();
            if self.seen.insert(name.clone()) {
                return Ok(Some(name));
            }
        }
        Ok(None)
    }

    pub(crate) fn into_entry_stream(self) -> EntryStream {
        Box::pin(stream::unfold(Some(self), |walk| async move {
            let mut walk = walk?;
            match walk.next_entry().await {
                Ok(Some(entry)) => Some((Ok(entry), Some(walk))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        }))
    }

    pub(crate) fn into_child_stream(self) -> ChildStream {
        Box::pin(stream::unfold(Some(self), |walk| async move {
            let mut walk = walk?;
            match walk.next_child().await {
                Ok(Some(name)) => Some((Ok(name), Some(walk))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        }))
    }
}
