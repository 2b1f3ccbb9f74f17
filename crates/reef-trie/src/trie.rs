//! Versioned path trie over the metadata log.

use std::collections::BTreeMap;
use std::sync::Arc;

use reef_cache::{Cache, CacheStats};
use reef_log::{GetOptions, Log};
use reef_types::Stat;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::TrieError;
use crate::iter::{ChildStream, EntryStream, Walk};
use crate::node::{DriveHeader, PointerRow, TrieNode};
use crate::path;

type Result<T> = std::result::Result<T, TrieError>;

/// Handle to the trie stored in a metadata log.
///
/// Clones share the log, the node cache and the write lock. A handle made
/// by [`Trie::checkout`] is pinned to a historical version and read-only.
#[derive(Clone)]
pub struct Trie {
    log: Arc<Log>,
    cache: Arc<Cache<u64, Arc<TrieNode>>>,
    read_options: GetOptions,
    checkout: Option<u64>,
    write_lock: Arc<Mutex<()>>,
}

impl Trie {
    /// Wrap a metadata log. `cache_size` bounds the decoded node cache.
    pub fn new(log: Arc<Log>, cache_size: usize, read_options: GetOptions) -> Self {
        Self {
            log,
            cache: Arc::new(Cache::new(cache_size)),
            read_options,
            checkout: None,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn log(&self) -> &Arc<Log> {
        &self.log
    }

    /// Write the drive header into an empty writable log.
    pub async fn init(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.log.writable() && self.log.length() == 0 {
            self.log.append(&DriveHeader::default().encode()?).await?;
            debug!(key = %self.log.key(), "trie initialised");
        }
        Ok(())
    }

    /// Read block 0, if the log has one.
    pub async fn header(&self) -> Result<Option<DriveHeader>> {
        if self.version() == 0 {
            return Ok(None);
        }
        let block = self.log.get_with(0, self.read_options).await?;
        Ok(Some(DriveHeader::decode(&block)?))
    }

    /// Number of metadata blocks visible to this handle.
    pub fn version(&self) -> u64 {
        let length = self.log.length();
        self.checkout.map_or(length, |v| v.min(length))
    }

    /// A read-only view of the trie as of `version`.
    pub fn checkout(&self, version: u64) -> Result<Trie> {
        let current = self.log.length();
        if version > current {
            return Err(TrieError::VersionOutOfRange { version, current });
        }
        Ok(Trie {
            checkout: Some(version),
            ..self.clone()
        })
    }

    pub fn is_checkout(&self) -> bool {
        self.checkout.is_some()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Seq of the newest node, if the trie holds any.
    pub(crate) fn head(&self) -> Option<u64> {
        match self.version() {
            0 | 1 => None,
            v => Some(v - 1),
        }
    }

    pub(crate) async fn node(&self, seq: u64) -> Result<Arc<TrieNode>> {
        if let Some(node) = self.cache.get(&seq) {
            return Ok(node);
        }
        let block = self.log.get_with(seq, self.read_options).await?;
        let node = Arc::new(TrieNode::decode(seq, &block)?);
        self.cache.put(seq, node.clone());
        Ok(node)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Store `stat` at `path`. Returns the seq of the new node.
    pub async fn put(&self, path: &str, stat: Stat) -> Result<u64> {
        self.insert(path, Some(stat)).await
    }

    /// Write a tombstone for `path`. Fails if nothing is stored there.
    pub async fn del(&self, path: &str) -> Result<u64> {
        if self.get(path).await?.is_none() {
            return Err(TrieError::NotFound(path::display(&path::key(path)?)));
        }
        self.insert(path, None).await
    }

    async fn insert(&self, path: &str, value: Option<Stat>) -> Result<u64> {
        if let Some(version) = self.checkout {
            return Err(TrieError::ReadOnlyCheckout(version));
        }
        let segments = path::normalize(path)?;
        if segments.is_empty() {
            return Err(TrieError::InvalidPath(path.to_string()));
        }
        let key = segments.join("/");

        let _guard = self.write_lock.lock().await;
        let hash = path::hash_path(&segments);
        let pointers = self.build_pointers(&hash).await?;
        let node = TrieNode::new(key, value, pointers);
        let seq = self.log.append(&node.encode()?).await?;
        trace!(seq, key = %node.key, tombstone = node.is_tombstone(), "trie node appended");
        self.cache.put(seq, Arc::new(node));
        Ok(seq)
    }

    /// Pointer table for a new node with hash path `hash`.
    ///
    /// Walks from the head towards the newest node sharing the longest
    /// prefix with `hash`. Rows of nodes that agree at a position are
    /// inherited; at a divergence the diverging node itself becomes the
    /// target for its digit. Newer nodes are met first, so existing
    /// entries are never overwritten.
    async fn build_pointers(&self, hash: &[u8]) -> Result<Vec<PointerRow>> {
        let mut rows: BTreeMap<usize, BTreeMap<u8, u64>> = BTreeMap::new();
        let Some(mut seq) = self.head() else {
            return Ok(Vec::new());
        };
        let mut p = 0;
        loop {
            let node = self.node(seq).await?;
            let other = node.hash();
            while p < hash.len() && p < other.len() && hash[p] == other[p] {
                if let Some(row) = node.row(p) {
                    let entry = rows.entry(p).or_default();
                    for (digit, target) in &row.targets {
                        entry.entry(*digit).or_insert(*target);
                    }
                }
                p += 1;
            }
            if p >= hash.len() || p >= other.len() {
                // Older version of the same key; its rows were inherited.
                break;
            }
            let entry = rows.entry(p).or_default();
            if let Some(row) = node.row(p) {
                for (digit, target) in &row.targets {
                    if *digit != hash[p] {
                        entry.entry(*digit).or_insert(*target);
                    }
                }
            }
            entry.entry(other[p]).or_insert(seq);
            match node.pointer(p, hash[p]) {
                Some(next) => seq = next,
                None => break,
            }
        }
        Ok(rows
            .into_iter()
            .filter(|(_, targets)| !targets.is_empty())
            .map(|(position, targets)| PointerRow {
                position: position as u32,
                targets: targets.into_iter().collect(),
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// The newest node stored for `path`, including tombstones.
    pub async fn get_node(&self, path: &str) -> Result<Option<Arc<TrieNode>>> {
        let segments = path::normalize(path)?;
        if segments.is_empty() {
            return Ok(None);
        }
        let key = segments.join("/");
        let hash = path::hash_path(&segments);

        let Some(mut seq) = self.head() else {
            return Ok(None);
        };
        let mut p = 0;
        loop {
            let node = self.node(seq).await?;
            let other = node.hash();
            while p < hash.len() && p < other.len() && hash[p] == other[p] {
                p += 1;
            }
            if p == hash.len() && other.len() == hash.len() {
                return Ok((node.key == key).then_some(node));
            }
            if p >= hash.len() || p >= other.len() {
                return Ok(None);
            }
            match node.pointer(p, hash[p]) {
                Some(next) => seq = next,
                None => return Ok(None),
            }
        }
    }

    /// The live record stored at `path`.
    pub async fn get(&self, path: &str) -> Result<Option<Stat>> {
        Ok(self.get_node(path).await?.and_then(|node| node.value.clone()))
    }

    /// Newest node whose hash path starts with `prefix`, and the position
    /// where the walk below it starts.
    pub(crate) async fn find_prefix(&self, prefix: &[u8]) -> Result<Option<(u64, usize)>> {
        let Some(mut seq) = self.head() else {
            return Ok(None);
        };
        let mut p = 0;
        loop {
            let node = self.node(seq).await?;
            let other = node.hash();
            while p < prefix.len() && p < other.len() && prefix[p] == other[p] {
                p += 1;
            }
            if p == prefix.len() {
                return Ok(Some((seq, p)));
            }
            if p >= other.len() {
                return Ok(None);
            }
            match node.pointer(p, prefix[p]) {
                Some(next) => seq = next,
                None => return Ok(None),
            }
        }
    }

    /// Whether any live entry exists strictly below `path`.
    pub async fn has_children(&self, path: &str) -> Result<bool> {
        let segments = path::normalize(path)?;
        let mut walk = Walk::entries(self.clone(), &segments);
        Ok(walk.next_entry().await?.is_some())
    }

    /// Names of the immediate children of directory `path`.
    pub async fn list(&self, path: &str) -> Result<Vec<String>> {
        let segments = path::normalize(path)?;
        let mut walk = Walk::children(self.clone(), &segments);
        let mut names = Vec::new();
        while let Some(name) = walk.next_child().await? {
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    /// Lazily stream the names of the immediate children of `path`.
    pub fn children(&self, path: &str) -> Result<ChildStream> {
        let segments = path::normalize(path)?;
        Ok(Walk::children(self.clone(), &segments).into_child_stream())
    }

    /// Lazily stream every live entry below `path`.
    pub fn stream(&self, path: &str) -> Result<EntryStream> {
        let segments = path::normalize(path)?;
        Ok(Walk::entries(self.clone(), &segments).into_entry_stream())
    }
}
