//! The drive: a path trie over the metadata log plus file bytes in the
//! content log, replicated together.

use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_lite::{Stream, StreamExt, stream};
use reef_cache::CacheStats;
use reef_content::{ContentRange, ContentStore, ContentStream};
use reef_log::{GetOptions, Log, LogError, LogOptions};
use reef_net::{Feed, ReplicateOptions, ReplicationHandle};
use reef_store::{DirectoryProvider, StorageProvider};
use reef_trie::{DriveHeader, Trie, path};
use reef_types::{DEFAULT_FILE_MODE, DiscoveryKey, EntryKind, LogKind, PublicKey, Stat};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::DriveConfig;
use crate::error::DriveError;
use crate::options::{DirEntry, ReadStreamOptions, WriteOptions};

type Result<T> = std::result::Result<T, DriveError>;

/// File bytes produced lazily; an error is always the last item.
pub type FileStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Directory entries produced lazily; an error is always the last item.
pub type DirectoryStream = Pin<Box<dyn Stream<Item = Result<DirEntry>> + Send>>;

struct DriveInner {
    key: PublicKey,
    writable: bool,
    metadata: Arc<Log>,
    content: Arc<Log>,
    store: ContentStore,
    config: DriveConfig,
    /// `None` on the writer, which never waits for blocks.
    fetch_timeout: Option<Duration>,
    /// Spans the content append and the trie update of one mutation.
    write_lock: Mutex<()>,
}

/// A replicable, versioned file tree identified by a public key.
///
/// Clones share the same logs and caches. A handle from
/// [`Drive::checkout`] reads a historical version and is never writable.
#[derive(Clone)]
pub struct Drive {
    inner: Arc<DriveInner>,
    trie: Trie,
}

impl Drive {
    /// Open (or create) a drive in `provider`.
    ///
    /// The returned future resolves once both logs are loaded, the keys are
    /// resolved and, for a new writable drive, the metadata header is
    /// written. The drive is ready to use when this returns.
    pub async fn open(provider: &dyn StorageProvider, config: DriveConfig) -> Result<Self> {
        let (key, keypair) = config.resolve_keys()?;
        let writable = keypair.is_some();

        let metadata = Arc::new(
            Log::open(
                provider,
                LogOptions {
                    kind: LogKind::Metadata,
                    key,
                    keypair: keypair.clone(),
                    cache_size: config.metadata_storage_cache_size(),
                },
            )
            .await?,
        );
        let content = Arc::new(
            Log::open(
                provider,
                LogOptions {
                    kind: LogKind::Content,
                    key,
                    keypair,
                    cache_size: config.content_storage_cache_size(),
                },
            )
            .await?,
        );

        let fetch_timeout = (!writable).then(|| config.fetch_timeout());
        let read_options = if writable {
            GetOptions::local()
        } else {
            GetOptions::wait(fetch_timeout)
        };

        let trie = Trie::new(metadata.clone(), config.tree_cache_size(), read_options);
        trie.init().await?;
        if metadata.has(0)
            && let Some(header) = trie.header().await?
            && header != DriveHeader::default()
        {
            return Err(DriveError::Config(format!(
                "unsupported drive protocol {:?}",
                header.protocol
            )));
        }

        let store = ContentStore::new(content.clone(), config.content_block_size(), read_options);

        info!(
            key = %key,
            writable,
            version = trie.version(),
            sparse = config.sparse,
            sparse_metadata = config.sparse_metadata,
            "drive ready"
        );

        Ok(Self {
            inner: Arc::new(DriveInner {
                key,
                writable,
                metadata,
                content,
                store,
                config,
                fetch_timeout,
                write_lock: Mutex::new(()),
            }),
            trie,
        })
    }

    /// Open (or create) a drive persisted under `root`.
    pub async fn open_dir(root: impl AsRef<Path>, config: DriveConfig) -> Result<Self> {
        let provider = DirectoryProvider::new(root);
        Self::open(&provider, config).await
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    pub fn key(&self) -> PublicKey {
        self.inner.key
    }

    pub fn discovery_key(&self) -> DiscoveryKey {
        self.inner.key.discovery_key()
    }

    /// Whether this handle can write: the secret key is present and it is
    /// not a checkout.
    pub fn writable(&self) -> bool {
        self.inner.writable && !self.trie.is_checkout()
    }

    /// Metadata log length visible to this handle.
    pub fn version(&self) -> u64 {
        self.trie.version()
    }

    /// Suspend until the metadata log reaches `version`.
    pub async fn wait_for_version(&self, version: u64) -> Result<u64> {
        self.inner
            .metadata
            .wait_for_length(version, self.inner.fetch_timeout)
            .await
            .map_err(|e| match e {
                LogError::Timeout(length) => DriveError::Timeout(format!("version {length}")),
                e => e.into(),
            })
    }

    pub fn config(&self) -> &DriveConfig {
        &self.inner.config
    }

    pub fn metadata_log(&self) -> &Arc<Log> {
        &self.inner.metadata
    }

    pub fn content_log(&self) -> &Arc<Log> {
        &self.inner.content
    }

    pub fn tree_cache_stats(&self) -> CacheStats {
        self.trie.cache_stats()
    }

    /// A read-only view of the drive as of `version`.
    pub fn checkout(&self, version: u64) -> Result<Drive> {
        Ok(Drive {
            inner: self.inner.clone(),
            trie: self.trie.checkout(version)?,
        })
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Store `data` at `path`, replacing any previous file there.
    pub async fn write_file(
        &self,
        path: &str,
        data: impl Into<Bytes>,
        options: WriteOptions,
    ) -> Result<Stat> {
        let key = file_key(path)?;
        self.ensure_writable()?;
        let _guard = self.inner.write_lock.lock().await;
        let range = self.inner.store.write(data).await?;
        self.commit(&key, range, options).await
    }

    /// Store everything read from `reader` at `path`.
    pub async fn write_file_from(
        &self,
        path: &str,
        reader: impl AsyncRead + Unpin,
        options: WriteOptions,
    ) -> Result<Stat> {
        let key = file_key(path)?;
        self.ensure_writable()?;
        let _guard = self.inner.write_lock.lock().await;
        let range = self.inner.store.write_reader(reader).await?;
        self.commit(&key, range, options).await
    }

    async fn commit(&self, key: &str, range: ContentRange, options: WriteOptions) -> Result<Stat> {
        let now = now_ms();
        let stat = Stat {
            kind: EntryKind::File,
            size: range.length,
            blocks: range.blocks,
            offset: range.block_offset,
            byte_offset: range.byte_offset,
            mode: options.mode.unwrap_or(DEFAULT_FILE_MODE),
            mtime: options.mtime.unwrap_or(now),
            ctime: now,
        };
        let seq = self.trie.put(key, stat.clone()).await?;
        debug!(path = %path::display(key), size = stat.size, seq, "file written");
        Ok(stat)
    }

    /// Remove the file at `path`. Its bytes stay in the content log.
    pub async fn unlink(&self, path: &str) -> Result<()> {
        let key = file_key(path)?;
        self.ensure_writable()?;
        let _guard = self.inner.write_lock.lock().await;
        let seq = self.trie.del(&key).await?;
        debug!(path = %path::display(&key), seq, "file removed");
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.writable() {
            Ok(())
        } else {
            Err(DriveError::NotWritable)
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Record of the file at `path`. Directories are `NotFound`.
    async fn file_stat(&self, path: &str) -> Result<Stat> {
        let key = path::key(path)?;
        match self.trie.get(&key).await? {
            Some(stat) if stat.is_file() => Ok(stat),
            _ => Err(DriveError::NotFound(path::display(&key))),
        }
    }

    /// On a replica, wait until the content log covers the file.
    async fn ensure_content(&self, stat: &Stat) -> Result<()> {
        let end = stat.offset + stat.blocks;
        if self.inner.content.length() >= end || self.inner.writable {
            return Ok(());
        }
        self.inner
            .content
            .wait_for_length(end, self.inner.fetch_timeout)
            .await
            .map_err(|e| match e {
                LogError::Timeout(length) => {
                    DriveError::Timeout(format!("content length {length}"))
                }
                e => e.into(),
            })?;
        Ok(())
    }

    fn content_range(stat: &Stat) -> ContentRange {
        ContentRange {
            byte_offset: stat.byte_offset,
            length: stat.size,
            block_offset: stat.offset,
            blocks: stat.blocks,
        }
    }

    /// Entire contents of the file at `path`.
    pub async fn read_file(&self, path: &str) -> Result<Bytes> {
        let stat = self.file_stat(path).await?;
        self.ensure_content(&stat).await?;
        Ok(self.inner.store.read(stat.byte_offset, stat.size).await?)
    }

    /// Contents of the file at `path` decoded as UTF-8.
    pub async fn read_file_to_string(&self, path: &str) -> Result<String> {
        let bytes = self.read_file(path).await?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    /// Lazily stream the file at `path`, one block at a time.
    ///
    /// Every call starts a new stream. Lookup failures arrive as the first
    /// and only item.
    pub fn create_read_stream(&self, path: &str, options: ReadStreamOptions) -> FileStream {
        let start = ReadState::Start {
            drive: self.clone(),
            path: path.to_string(),
            options,
        };
        Box::pin(stream::unfold(start, |state| async move {
            let mut content = match state {
                ReadState::Start {
                    drive,
                    path,
                    options,
                } => match drive.open_content(&path, options).await {
                    Ok(content) => content,
                    Err(e) => return Some((Err(e), ReadState::Done)),
                },
                ReadState::Reading(content) => content,
                ReadState::Done => return None,
            };
            match content.next().await {
                Some(Ok(chunk)) => Some((Ok(chunk), ReadState::Reading(content))),
                Some(Err(e)) => Some((Err(e.into()), ReadState::Done)),
                None => None,
            }
        }))
    }

    async fn open_content(&self, path: &str, options: ReadStreamOptions) -> Result<ContentStream> {
        let stat = self.file_stat(path).await?;
        if options.start > stat.size {
            return Err(DriveError::OutOfRange {
                start: options.start,
                length: options.length.unwrap_or(0),
                size: stat.size,
            });
        }
        self.ensure_content(&stat).await?;
        let range = Self::content_range(&stat);
        Ok(self
            .inner
            .store
            .stream_range(&range, options.start, options.length))
    }

    /// Lazily stream every file below `path`, recursively.
    pub fn create_directory_stream(&self, path: &str) -> DirectoryStream {
        match self.trie.stream(path) {
            Ok(entries) => Box::pin(entries.map(|entry| {
                entry
                    .map(|e| DirEntry {
                        path: e.path,
                        stat: e.stat,
                    })
                    .map_err(DriveError::from)
            })),
            Err(e) => Box::pin(stream::once(Err(DriveError::from(e)))),
        }
    }

    /// Names of the immediate children of directory `path`.
    ///
    /// The root always lists, even when empty. Any other path must have
    /// children.
    pub async fn readdir(&self, path: &str) -> Result<Vec<String>> {
        let names = self.trie.list(path).await?;
        if names.is_empty() {
            let key = path::key(path)?;
            if !key.is_empty() {
                return Err(match self.trie.get(&key).await? {
                    Some(_) => DriveError::NotADirectory(path::display(&key)),
                    None => DriveError::NotFound(path::display(&key)),
                });
            }
        }
        Ok(names)
    }

    /// Record for `path`. The root and any path with children are
    /// directories unless a file is stored at exactly that path.
    pub async fn stat(&self, path: &str) -> Result<Stat> {
        let key = path::key(path)?;
        if key.is_empty() {
            return Ok(Stat::directory());
        }
        if let Some(stat) = self.trie.get(&key).await? {
            return Ok(stat);
        }
        if self.trie.has_children(&key).await? {
            return Ok(Stat::directory());
        }
        Err(DriveError::NotFound(path::display(&key)))
    }

    /// Succeeds if a file or directory exists at `path`.
    pub async fn access(&self, path: &str) -> Result<()> {
        self.stat(path).await.map(|_| ())
    }

    /// Fetch every block of the file, or of every file below the
    /// directory, at `path`.
    pub async fn download(&self, path: &str) -> Result<()> {
        match self.file_stat(path).await {
            Ok(stat) => return self.download_stat(&stat).await,
            Err(e) if !e.is_not_found() => return Err(e),
            Err(_) => {}
        }
        let mut entries = self.create_directory_stream(path);
        let mut found = false;
        while let Some(entry) = entries.next().await {
            self.download_stat(&entry?.stat).await?;
            found = true;
        }
        if !found {
            return Err(DriveError::NotFound(path::display(&path::key(path)?)));
        }
        Ok(())
    }

    async fn download_stat(&self, stat: &Stat) -> Result<()> {
        self.ensure_content(stat).await?;
        self.inner
            .store
            .download(&Self::content_range(stat))
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Replication
    // ------------------------------------------------------------------

    /// Replicate with the peer on the other end of `io`.
    ///
    /// Sparseness comes from the drive's config; `options` controls the
    /// session.
    pub fn replicate<S>(&self, io: S, options: ReplicateOptions) -> ReplicationHandle
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let config = &self.inner.config;
        reef_net::replicate(
            io,
            self.inner.key,
            [
                Feed {
                    log: self.inner.metadata.clone(),
                    sparse: config.sparse_metadata,
                },
                Feed {
                    log: self.inner.content.clone(),
                    sparse: config.sparse,
                },
            ],
            options,
        )
    }
}

enum ReadState {
    Start {
        drive: Drive,
        path: String,
        options: ReadStreamOptions,
    },
    Reading(ContentStream),
    Done,
}

fn file_key(path: &str) -> Result<String> {
    let key = path::key(path)?;
    if key.is_empty() {
        return Err(DriveError::InvalidPath(path.to_string()));
    }
    Ok(key)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}
