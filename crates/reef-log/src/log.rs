//! The block log: append, read, prove and verify.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bytes::Bytes;
use reef_cache::Cache;
use reef_store::StorageProvider;
use reef_types::{Keypair, LogKind, PublicKey, join_signature, split_signature};
use tokio::sync::{Notify, broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::bitfield::Bitfield;
use crate::error::LogError;
use crate::flat;
use crate::header::{self, Header};
use crate::node::{Node, signable, tree_hash};
use crate::proof::{BlockProof, Download, UpgradeProof, upgrade_nodes};
use crate::storage::LogStorage;

type Result<T> = std::result::Result<T, LogError>;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 1024;

/// How to open a [`Log`].
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub kind: LogKind,
    /// Key every head must be signed by.
    pub key: PublicKey,
    /// Present only on the writer.
    pub keypair: Option<Keypair>,
    /// Block cache capacity in entries; 0 disables the cache.
    pub cache_size: usize,
}

/// How [`Log::get_with`] treats a block that is not stored locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Register a waiter and suspend until a replication session delivers it.
    pub wait: bool,
    /// Give up waiting after this long. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl GetOptions {
    /// Fail immediately on a missing block.
    pub fn local() -> Self {
        Self::default()
    }

    /// Wait for a missing block, optionally bounded.
    pub fn wait(timeout: Option<Duration>) -> Self {
        Self {
            wait: true,
            timeout,
        }
    }
}

/// Something that happened to a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEvent {
    /// Local blocks appended; the log now has `length` blocks.
    Appended { length: u64 },
    /// A verified remote head extended the log to `length`.
    Upgraded { length: u64 },
    /// A verified remote block was stored.
    Downloaded { index: u64 },
    /// A local reader started waiting for a missing block.
    Want { index: u64 },
    /// The last reader waiting for a still-missing block gave up.
    Unwant { index: u64 },
}

/// The current signed head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Head {
    pub length: u64,
    pub byte_length: u64,
    pub tree_hash: [u8; 32],
    pub signature: [u8; 64],
}

/// What [`Log::apply_download`] did with a download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
    /// New trusted length, if the download extended the log.
    pub upgraded: Option<u64>,
    /// Block stored by the download.
    pub block: Option<u64>,
    /// The download could not be tied to anything trusted and was ignored.
    pub dropped: bool,
}

struct LogState {
    length: u64,
    byte_length: u64,
    roots: Vec<Node>,
    signature: [u8; 64],
    seq: u64,
    bitfield: Bitfield,
}

/// Readers waiting for missing blocks, by block index.
#[derive(Default)]
struct Waiters {
    inner: Mutex<HashMap<u64, Waiting>>,
}

struct Waiting {
    notify: Arc<Notify>,
    count: usize,
}

impl Waiters {
    /// Returns the block's notifier and whether this is the first waiter.
    fn register(&self, index: u64) -> (Arc<Notify>, bool) {
        let mut inner = self.inner.lock().expect("waiters lock poisoned");
        let waiting = inner.entry(index).or_insert_with(|| Waiting {
            notify: Arc::new(Notify::new()),
            count: 0,
        });
        waiting.count += 1;
        (waiting.notify.clone(), waiting.count == 1)
    }

    /// Returns whether this was the last waiter.
    fn release(&self, index: u64) -> bool {
        let mut inner = self.inner.lock().expect("waiters lock poisoned");
        let Some(waiting) = inner.get_mut(&index) else {
            return false;
        };
        waiting.count -= 1;
        if waiting.count == 0 {
            inner.remove(&index);
            return true;
        }
        false
    }

    fn wake(&self, index: u64) {
        let inner = self.inner.lock().expect("waiters lock poisoned");
        if let Some(waiting) = inner.get(&index) {
            waiting.notify.notify_waiters();
        }
    }

    fn pending(&self) -> Vec<u64> {
        let inner = self.inner.lock().expect("waiters lock poisoned");
        let mut pending: Vec<u64> = inner.keys().copied().collect();
        pending.sort_unstable();
        pending
    }
}

/// Registration of one reader waiting for a block; dropping it releases
/// the registration.
struct WaitGuard<'a> {
    log: &'a Log,
    index: u64,
    notify: Arc<Notify>,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if self.log.waiters.release(self.index) && !self.log.has(self.index) {
            trace!(kind = %self.log.kind, index = self.index, "block no longer wanted");
            let _ = self.log.events.send(LogEvent::Unwant { index: self.index });
        }
    }
}

/// Append-only, signed, Merkle-verified sequence of blocks.
///
/// The writer (holding the keypair) appends and signs. Replicas grow only
/// through [`Log::apply_download`], which accepts a block or head only after
/// it verifies against nodes already trusted or against a valid signature.
/// A replica may be sparse: any subset of blocks below the trusted length
/// can be present.
pub struct Log {
    kind: LogKind,
    key: PublicKey,
    keypair: Option<Keypair>,
    storage: LogStorage,
    state: RwLock<LogState>,
    /// Serializes appends and downloads.
    write_lock: tokio::sync::Mutex<()>,
    cache: Cache<u64, Bytes>,
    waiters: Waiters,
    events: broadcast::Sender<LogEvent>,
    length_tx: watch::Sender<u64>,
}

impl Log {
    /// Open a log, restoring its committed head from storage.
    pub async fn open(provider: &dyn StorageProvider, options: LogOptions) -> Result<Self> {
        if let Some(keypair) = &options.keypair
            && keypair.public_key() != options.key
        {
            return Err(LogError::KeyMismatch {
                expected: options.key,
                found: keypair.public_key(),
            });
        }

        let storage = LogStorage::open(provider, options.kind).await?;
        let mut state = LogState {
            length: 0,
            byte_length: 0,
            roots: Vec::new(),
            signature: [0u8; 64],
            seq: 0,
            bitfield: Bitfield::new(),
        };

        if let Some(header) = header::load(&storage.header).await? {
            if header.key != options.key {
                return Err(LogError::KeyMismatch {
                    expected: options.key,
                    found: header.key,
                });
            }

            let mut roots = Vec::new();
            for index in flat::full_roots(header.length) {
                let root = storage.read_node(index).await?.ok_or_else(|| {
                    LogError::CorruptHeader(format!("root node {index} missing"))
                })?;
                roots.push(root);
            }

            let mut bitfield = Bitfield::from_bytes(&storage.read_bitfield().await?);
            bitfield.truncate(header.length);

            state = LogState {
                length: header.length,
                byte_length: header.byte_length,
                roots,
                signature: join_signature(&header.signature_r, &header.signature_s),
                seq: header.seq,
                bitfield,
            };
        }

        debug!(
            kind = %options.kind,
            length = state.length,
            downloaded = state.bitfield.count(),
            writable = options.keypair.is_some(),
            "log opened"
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (length_tx, _) = watch::channel(state.length);

        Ok(Self {
            kind: options.kind,
            key: options.key,
            keypair: options.keypair,
            storage,
            state: RwLock::new(state),
            write_lock: tokio::sync::Mutex::new(()),
            cache: Cache::new(options.cache_size),
            waiters: Waiters::default(),
            events,
            length_tx,
        })
    }

    pub fn kind(&self) -> LogKind {
        self.kind
    }

    pub fn key(&self) -> PublicKey {
        self.key
    }

    /// Whether this log holds the secret key.
    pub fn writable(&self) -> bool {
        self.keypair.is_some()
    }

    /// Trusted length in blocks.
    pub fn length(&self) -> u64 {
        self.state.read().expect("lock poisoned").length
    }

    /// Trusted length in bytes.
    pub fn byte_length(&self) -> u64 {
        self.state.read().expect("lock poisoned").byte_length
    }

    /// The current head.
    pub fn head(&self) -> Head {
        let state = self.state.read().expect("lock poisoned");
        Head {
            length: state.length,
            byte_length: state.byte_length,
            tree_hash: tree_hash(&state.roots),
            signature: state.signature,
        }
    }

    /// Whether block `index` is stored locally.
    pub fn has(&self, index: u64) -> bool {
        self.state.read().expect("lock poisoned").bitfield.get(index)
    }

    /// Number of blocks stored locally.
    pub fn downloaded(&self) -> u64 {
        self.state.read().expect("lock poisoned").bitfield.count()
    }

    /// Locally stored blocks as `(start, length)` runs.
    pub fn downloaded_ranges(&self) -> Vec<(u64, u64)> {
        self.state.read().expect("lock poisoned").bitfield.ranges()
    }

    /// Blocks in `[start, end)` that are not stored locally.
    pub fn missing_in(&self, start: u64, end: u64) -> Vec<u64> {
        self.state
            .read()
            .expect("lock poisoned")
            .bitfield
            .missing(start, end)
    }

    /// Subscribe to [`LogEvent`]s.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.events.subscribe()
    }

    /// Blocks local readers are currently waiting for.
    pub fn pending_wants(&self) -> Vec<u64> {
        self.waiters.pending()
    }

    /// Suspend until the trusted length reaches `length`.
    pub async fn wait_for_length(&self, length: u64, timeout: Option<Duration>) -> Result<u64> {
        let mut rx = self.length_tx.subscribe();
        let reached = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, rx.wait_for(|l| *l >= length))
                .await
                .map_err(|_| LogError::Timeout(length))?
                .map(|l| *l),
            None => rx.wait_for(|l| *l >= length).await.map(|l| *l),
        };
        reached.map_err(|_| LogError::Closed)
    }

    // ------------------------------------------------------------------
    // Append
    // ------------------------------------------------------------------

    /// Append one block. Returns its index.
    pub async fn append(&self, block: &[u8]) -> Result<u64> {
        self.append_batch(&[block]).await
    }

    /// Append blocks in order under a single signed head. Returns the index
    /// of the first appended block.
    pub async fn append_batch<B: AsRef<[u8]>>(&self, blocks: &[B]) -> Result<u64> {
        let Some(keypair) = &self.keypair else {
            return Err(LogError::NotWritable);
        };

        let _write = self.write_lock.lock().await;

        let (start, mut byte_length, mut roots, seq, bitfield_bytes) = {
            let state = self.state.read().expect("lock poisoned");
            let end = state.length + blocks.len() as u64;
            (
                state.length,
                state.byte_length,
                state.roots.clone(),
                state.seq,
                bitfield_bytes(&state.bitfield, state.length, end),
            )
        };

        if blocks.is_empty() {
            return Ok(start);
        }

        let mut nodes = Vec::new();
        for (i, block) in blocks.iter().enumerate() {
            let block = block.as_ref();
            let index = start + i as u64;

            self.storage.write_data(byte_length, block).await?;
            byte_length += block.len() as u64;

            let mut node = Node::leaf(index, block);
            nodes.push(node);
            while let Some(last) = roots.last()
                && last.index == flat::sibling(node.index)
            {
                node = Node::parent(last, &node);
                roots.pop();
                nodes.push(node);
            }
            roots.push(node);
        }

        let length = start + blocks.len() as u64;
        let signature = keypair.sign(&signable(
            self.kind.namespace(),
            &tree_hash(&roots),
            length,
        ));

        self.storage.write_nodes(&nodes).await?;
        for (byte_index, byte) in &bitfield_bytes {
            self.storage.write_bitfield_byte(*byte_index, *byte).await?;
        }
        self.storage.sync().await?;

        let (signature_r, signature_s) = split_signature(&signature);
        header::commit(
            &self.storage.header,
            &Header {
                seq: seq + 1,
                key: self.key,
                length,
                byte_length,
                signature_r,
                signature_s,
            },
        )
        .await?;

        {
            let mut state = self.state.write().expect("lock poisoned");
            state.length = length;
            state.byte_length = byte_length;
            state.roots = roots;
            state.signature = signature;
            state.seq = seq + 1;
            for index in start..length {
                state.bitfield.set(index, true);
            }
        }

        self.length_tx.send_replace(length);
        let _ = self.events.send(LogEvent::Appended { length });
        for index in start..length {
            self.waiters.wake(index);
        }

        debug!(kind = %self.kind, start, length, byte_length, "appended blocks");
        Ok(start)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Read a locally stored block.
    pub async fn get(&self, index: u64) -> Result<Bytes> {
        self.get_with(index, GetOptions::local()).await
    }

    /// Read a block, optionally waiting for a replication session to
    /// deliver it.
    pub async fn get_with(&self, index: u64, options: GetOptions) -> Result<Bytes> {
        if let Some(block) = self.cache.get(&index) {
            return Ok(block);
        }

        if !self.has(index) {
            if !options.wait {
                let length = self.length();
                if index >= length {
                    return Err(LogError::OutOfRange {
                        position: index,
                        length,
                    });
                }
                return Err(LogError::MissingBlock(index));
            }
            self.wait_for_block(index, options.timeout).await?;
        }

        self.read_block(index, options).await
    }

    fn get_boxed(&self, index: u64, options: GetOptions) -> BoxFuture<'_, Result<Bytes>> {
        Box::pin(self.get_with(index, options))
    }

    async fn wait_for_block(&self, index: u64, timeout: Option<Duration>) -> Result<()> {
        let guard = self.register_waiter(index);
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let notified = guard.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.has(index) {
                return Ok(());
            }

            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, notified)
                    .await
                    .map_err(|_| LogError::Timeout(index))?,
                None => notified.await,
            }
        }
    }

    fn register_waiter(&self, index: u64) -> WaitGuard<'_> {
        let (notify, first) = self.waiters.register(index);
        if first {
            trace!(kind = %self.kind, index, "block wanted");
            let _ = self.events.send(LogEvent::Want { index });
        }
        WaitGuard {
            log: self,
            index,
            notify,
        }
    }

    async fn read_block(&self, index: u64, options: GetOptions) -> Result<Bytes> {
        let leaf = self
            .stored_node(index * 2, self.length())
            .await?
            .ok_or(LogError::MissingNode(index * 2))?;
        let offset = self.byte_offset(index, options).await?;
        let block = self.storage.read_data(offset, leaf.size).await?;
        self.cache.put(index, block.clone());
        Ok(block)
    }

    /// Byte offset at which block `index` starts.
    pub async fn byte_offset(&self, index: u64, options: GetOptions) -> Result<u64> {
        let mut offset = 0;
        for root in flat::full_roots(index) {
            offset += self.resolve_node(root, options).await?.size;
        }
        Ok(offset)
    }

    /// Map an absolute byte offset to `(block index, offset within block)`.
    ///
    /// An offset equal to the byte length maps to `(length, 0)`. On a sparse
    /// replica, tree nodes missing on the way down are obtained by fetching
    /// a block beneath them when `options.wait` is set.
    pub async fn seek(&self, byte_offset: u64, options: GetOptions) -> Result<(u64, u64)> {
        let (length, byte_length, roots) = {
            let state = self.state.read().expect("lock poisoned");
            (state.length, state.byte_length, state.roots.clone())
        };

        if byte_offset > byte_length {
            return Err(LogError::OutOfRange {
                position: byte_offset,
                length: byte_length,
            });
        }

        let mut remaining = byte_offset;
        for root in roots {
            if remaining >= root.size {
                remaining -= root.size;
                continue;
            }

            let mut node = root;
            while let Some((left, right)) = flat::children(node.index) {
                let left = self.resolve_node(left, options).await?;
                if remaining < left.size {
                    node = left;
                } else {
                    remaining -= left.size;
                    node = self.resolve_node(right, options).await?;
                }
            }
            return Ok((node.index / 2, remaining));
        }

        Ok((length, remaining))
    }

    /// A trusted node from storage. Nodes reaching past `length` are not
    /// covered by a committed head and are ignored.
    async fn stored_node(&self, index: u64, length: u64) -> Result<Option<Node>> {
        if flat::right_span(index) / 2 >= length {
            return Ok(None);
        }
        self.storage.read_node(index).await
    }

    /// A stored node, or one derived from stored descendants.
    fn compute_node(&self, index: u64, length: u64) -> BoxFuture<'_, Result<Option<Node>>> {
        Box::pin(async move {
            if let Some(node) = self.stored_node(index, length).await? {
                return Ok(Some(node));
            }
            let Some((left, right)) = flat::children(index) else {
                return Ok(None);
            };
            let Some(left) = self.compute_node(left, length).await? else {
                return Ok(None);
            };
            let Some(right) = self.compute_node(right, length).await? else {
                return Ok(None);
            };
            Ok(Some(Node::parent(&left, &right)))
        })
    }

    /// Like [`Self::compute_node`], fetching blocks beneath the node until
    /// it can be derived when `options.wait` is set.
    async fn resolve_node(&self, index: u64, options: GetOptions) -> Result<Node> {
        loop {
            if let Some(node) = self.compute_node(index, self.length()).await? {
                return Ok(node);
            }

            let missing = if options.wait {
                let (start, end) = flat::blocks(index);
                self.state
                    .read()
                    .expect("lock poisoned")
                    .bitfield
                    .first_missing(start, end)
            } else {
                None
            };

            let Some(missing) = missing else {
                return Err(LogError::MissingNode(index));
            };
            trace!(kind = %self.kind, node = index, block = missing, "fetching block for tree node");
            self.get_boxed(missing, options).await?;
        }
    }

    // ------------------------------------------------------------------
    // Proofs
    // ------------------------------------------------------------------

    /// Prove block `index` against the roots of `target_length`.
    pub async fn proof(&self, index: u64, target_length: u64) -> Result<BlockProof> {
        let length = self.length();
        if index >= target_length || target_length > length {
            return Err(LogError::OutOfRange {
                position: index,
                length: target_length.min(length),
            });
        }

        let value = self.get(index).await?;
        let roots = flat::full_roots(target_length);
        let mut nodes = Vec::new();
        let mut current = index * 2;

        while !roots.contains(&current) {
            let sibling = flat::sibling(current);
            let node = self
                .compute_node(sibling, length)
                .await?
                .ok_or(LogError::MissingNode(sibling))?;
            nodes.push(node);
            current = flat::parent(current);
        }

        Ok(BlockProof {
            index,
            value,
            nodes,
        })
    }

    /// Prove the current head to a replica that trusts `from_length` blocks.
    pub async fn upgrade_proof(&self, from_length: u64) -> Result<UpgradeProof> {
        let (length, signature) = {
            let state = self.state.read().expect("lock poisoned");
            (state.length, state.signature)
        };
        self.upgrade_proof_at(from_length, length, signature).await
    }

    async fn upgrade_proof_at(
        &self,
        from_length: u64,
        length: u64,
        signature: [u8; 64],
    ) -> Result<UpgradeProof> {
        let mut nodes = Vec::new();
        for index in upgrade_nodes(from_length, length) {
            let node = self
                .compute_node(index, length)
                .await?
                .ok_or(LogError::MissingNode(index))?;
            nodes.push(node);
        }

        let (signature_r, signature_s) = split_signature(&signature);
        Ok(UpgradeProof {
            length,
            nodes,
            signature_r,
            signature_s,
        })
    }

    /// Answer a remote request.
    ///
    /// `block` is the wanted block (if any), `known_length` the requester's
    /// trusted length. Returns `None` when there is nothing useful to send.
    pub async fn serve(&self, block: Option<u64>, known_length: u64) -> Result<Option<Download>> {
        let (length, signature) = {
            let state = self.state.read().expect("lock poisoned");
            (state.length, state.signature)
        };
        if length == 0 {
            return Ok(None);
        }

        let block = match block {
            Some(index) if index < length && self.has(index) => {
                Some(self.proof(index, length).await?)
            }
            Some(_) => return Ok(None),
            None => None,
        };

        let needs_upgrade =
            length > known_length || (block.is_some() && length != known_length);
        let upgrade = if needs_upgrade {
            Some(self.upgrade_proof_at(known_length, length, signature).await?)
        } else {
            None
        };

        if block.is_none() && upgrade.is_none() {
            return Ok(None);
        }
        Ok(Some(Download { block, upgrade }))
    }

    // ------------------------------------------------------------------
    // Downloads
    // ------------------------------------------------------------------

    /// Verify and store a download received from a peer.
    ///
    /// The upgrade (if any) must rebuild roots whose signature verifies
    /// under this log's key; the block (if any) must hash up to a node that
    /// is trusted locally or was just proven by the upgrade. A mismatch with
    /// trusted data is an [`LogError::Integrity`] error and stores nothing.
    /// A download that cannot be tied to trusted data is dropped.
    pub async fn apply_download(&self, download: Download) -> Result<Applied> {
        let _write = self.write_lock.lock().await;

        let (length, seq) = {
            let state = self.state.read().expect("lock poisoned");
            (state.length, state.seq)
        };

        if let Some(upgrade) = &download.upgrade
            && upgrade.length > flat::MAX_LENGTH
        {
            warn!(kind = %self.kind, length = upgrade.length, "rejecting oversized head");
            return Err(LogError::Integrity(format!(
                "{} head length {} exceeds {}",
                self.kind,
                upgrade.length,
                flat::MAX_LENGTH
            )));
        }
        if let Some(proof) = &download.block
            && proof.index >= flat::MAX_LENGTH
        {
            return Err(LogError::Integrity(format!(
                "{} block index {} exceeds {}",
                self.kind,
                proof.index,
                flat::MAX_LENGTH
            )));
        }

        let mut applied = Applied::default();
        let mut proven: HashMap<u64, Node> = HashMap::new();
        let mut new_head = None;

        if let Some(upgrade) = &download.upgrade {
            match self.verify_upgrade(upgrade, length).await? {
                Some((roots, nodes)) => {
                    proven = nodes;
                    if upgrade.length > length {
                        new_head = Some((upgrade.length, roots, upgrade.signature()));
                    }
                }
                None => {
                    warn!(kind = %self.kind, length = upgrade.length, "dropping unverifiable upgrade");
                    applied.dropped = true;
                    return Ok(applied);
                }
            }
        }

        let trusted_length = new_head.as_ref().map_or(length, |(l, _, _)| *l);

        let mut block = None;
        if let Some(proof) = &download.block
            && !self.has(proof.index)
        {
            match self
                .verify_block(proof, &proven, length, trusted_length)
                .await?
            {
                Some(path) => block = Some((proof.index, &proof.value, path)),
                None => {
                    debug!(kind = %self.kind, index = proof.index, "dropping unverifiable block");
                    applied.dropped = true;
                }
            }
        }

        let mut nodes: Vec<Node> = proven.values().copied().collect();
        if let Some((_, _, path)) = &block {
            nodes.extend(path.iter().copied());
        }
        self.storage.write_nodes(&nodes).await?;

        if let Some((index, value, path)) = &block {
            let lookup: HashMap<u64, Node> = nodes.iter().map(|n| (n.index, *n)).collect();
            let offset = self
                .download_offset(*index, &lookup, trusted_length)
                .await?;
            self.storage.write_data(offset, value).await?;

            let byte = {
                let state = self.state.read().expect("lock poisoned");
                state.bitfield.byte_for(*index) | (1u8 << (*index % 8))
            };
            self.storage.write_bitfield_byte(*index / 8, byte).await?;
            trace!(kind = %self.kind, index, nodes = path.len(), "stored verified block");
        }
        self.storage.sync().await?;

        if let Some((new_length, roots, signature)) = &new_head {
            let byte_length = roots.iter().map(|r| r.size).sum();
            let (signature_r, signature_s) = split_signature(signature);
            header::commit(
                &self.storage.header,
                &Header {
                    seq: seq + 1,
                    key: self.key,
                    length: *new_length,
                    byte_length,
                    signature_r,
                    signature_s,
                },
            )
            .await?;

            let mut state = self.state.write().expect("lock poisoned");
            state.length = *new_length;
            state.byte_length = byte_length;
            state.roots = roots.clone();
            state.signature = *signature;
            state.seq = seq + 1;
        }

        if let Some((index, _, _)) = &block {
            self.state
                .write()
                .expect("lock poisoned")
                .bitfield
                .set(*index, true);
        }

        if let Some((new_length, _, _)) = new_head {
            debug!(kind = %self.kind, from = length, to = new_length, "upgraded to remote head");
            self.length_tx.send_replace(new_length);
            let _ = self.events.send(LogEvent::Upgraded { length: new_length });
            applied.upgraded = Some(new_length);
        }

        if let Some((index, _, _)) = block {
            self.waiters.wake(index);
            let _ = self.events.send(LogEvent::Downloaded { index });
            applied.block = Some(index);
        }

        Ok(applied)
    }

    /// Rebuild the roots of `upgrade.length` from trusted and supplied nodes
    /// and check the signature. Returns the roots and every node that was
    /// newly proven, or `None` if the supplied nodes are insufficient.
    async fn verify_upgrade(
        &self,
        upgrade: &UpgradeProof,
        length: u64,
    ) -> Result<Option<(Vec<Node>, HashMap<u64, Node>)>> {
        let supplied: HashMap<u64, Node> = upgrade.nodes.iter().map(|n| (n.index, *n)).collect();
        let mut proven = HashMap::new();
        let mut roots = Vec::new();

        for index in flat::full_roots(upgrade.length) {
            match self
                .resolve_upgrade_node(index, &supplied, length, &mut proven)
                .await?
            {
                Some(root) => roots.push(root),
                None => return Ok(None),
            }
        }

        let message = signable(self.kind.namespace(), &tree_hash(&roots), upgrade.length);
        if !self.key.verify(&message, &upgrade.signature()) {
            warn!(kind = %self.kind, length = upgrade.length, "rejecting head with invalid signature");
            return Err(LogError::Integrity(format!(
                "invalid signature for {} head of length {}",
                self.kind, upgrade.length
            )));
        }

        Ok(Some((roots, proven)))
    }

    fn resolve_upgrade_node<'a>(
        &'a self,
        index: u64,
        supplied: &'a HashMap<u64, Node>,
        length: u64,
        proven: &'a mut HashMap<u64, Node>,
    ) -> BoxFuture<'a, Result<Option<Node>>> {
        Box::pin(async move {
            if let Some(node) = proven.get(&index) {
                return Ok(Some(*node));
            }

            if let Some(stored) = self.stored_node(index, length).await? {
                if let Some(claimed) = supplied.get(&index)
                    && *claimed != stored
                {
                    return Err(LogError::Integrity(format!(
                        "{} node {index} conflicts with trusted history",
                        self.kind
                    )));
                }
                return Ok(Some(stored));
            }

            if let Some(node) = supplied.get(&index) {
                proven.insert(index, *node);
                return Ok(Some(*node));
            }

            let Some((left, right)) = flat::children(index) else {
                return Ok(None);
            };
            let Some(left) = self
                .resolve_upgrade_node(left, supplied, length, proven)
                .await?
            else {
                return Ok(None);
            };
            let Some(right) = self
                .resolve_upgrade_node(right, supplied, length, proven)
                .await?
            else {
                return Ok(None);
            };

            let node = Node::parent(&left, &right);
            proven.insert(index, node);
            Ok(Some(node))
        })
    }

    /// Hash the block up its proof until a trusted node is reached.
    ///
    /// Returns the leaf, siblings and computed parents to store, or `None`
    /// when the proof runs out without meeting a trusted node.
    async fn verify_block(
        &self,
        proof: &BlockProof,
        proven: &HashMap<u64, Node>,
        length: u64,
        trusted_length: u64,
    ) -> Result<Option<Vec<Node>>> {
        if proof.index >= trusted_length {
            return Ok(None);
        }

        let mut node = Node::leaf(proof.index, &proof.value);
        let mut path = vec![node];
        let mut siblings = proof.nodes.iter();

        loop {
            let trusted = match proven.get(&node.index) {
                Some(node) => Some(*node),
                None => self.stored_node(node.index, length).await?,
            };

            if let Some(trusted) = trusted {
                if trusted != node {
                    warn!(kind = %self.kind, index = proof.index, node = node.index, "block failed verification");
                    return Err(LogError::Integrity(format!(
                        "{} block {} does not match trusted node {}",
                        self.kind, proof.index, node.index
                    )));
                }
                return Ok(Some(path));
            }

            let Some(sibling) = siblings.next() else {
                return Ok(None);
            };
            if sibling.index != flat::sibling(node.index) {
                return Err(LogError::Integrity(format!(
                    "malformed proof for {} block {}",
                    self.kind, proof.index
                )));
            }

            path.push(*sibling);
            node = Node::parent(&node, sibling);
            path.push(node);
        }
    }

    /// Byte offset of a block being downloaded, consulting nodes that are
    /// about to be stored alongside the trusted ones.
    async fn download_offset(
        &self,
        index: u64,
        pending: &HashMap<u64, Node>,
        trusted_length: u64,
    ) -> Result<u64> {
        let mut offset = 0;
        for root in flat::full_roots(index) {
            let node = match pending.get(&root) {
                Some(node) => *node,
                None => self
                    .compute_node(root, trusted_length)
                    .await?
                    .ok_or(LogError::MissingNode(root))?,
            };
            offset += node.size;
        }
        Ok(offset)
    }
}

/// Persisted bitfield bytes after setting every bit in `[start, end)`.
fn bitfield_bytes(bitfield: &Bitfield, start: u64, end: u64) -> BTreeMap<u64, u8> {
    let mut bytes = BTreeMap::new();
    for index in start..end {
        let byte = bytes
            .entry(index / 8)
            .or_insert_with(|| bitfield.byte_for(index));
        *byte |= 1u8 << (index % 8);
    }
    bytes
}
