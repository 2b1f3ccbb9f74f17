//! Shared test harness for reef integration tests.
//!
//! Provides [`DrivePair`], a writer drive plus a replica of it, and helpers
//! that connect drives over in-memory duplex pipes, optionally through a
//! relay that can rewrite frames in flight.

use std::sync::Arc;

use reef_drive::{Drive, DriveConfig, ReplicateOptions, ReplicationHandle};
use reef_store::{MemoryProvider, StorageProvider};
use reef_types::Keypair;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tracing_subscriber::EnvFilter;

/// Content block size used by test drives, small enough that most files
/// span several blocks.
pub const TEST_BLOCK_SIZE: usize = 4096;

/// Buffer size of each in-memory pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Route `tracing` output through the test harness. Safe to call from
/// every test; only the first call installs the subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Deterministic pseudo-random bytes.
pub fn test_data_seeded(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}

/// Writer config with a fixed key.
pub fn writer_config(seed: u8) -> DriveConfig {
    DriveConfig {
        content_block_size: Some(TEST_BLOCK_SIZE),
        ..DriveConfig::writable(&Keypair::from_secret_bytes(&[seed; 32]))
    }
}

/// A writer and a replica of the same drive, each on its own storage.
pub struct DrivePair {
    pub writer: Drive,
    pub replica: Drive,
}

impl DrivePair {
    /// Open a fresh pair. `configure` adjusts the replica's config.
    pub async fn new(seed: u8, configure: impl FnOnce(&mut DriveConfig)) -> Self {
        Self::with_providers(
            seed,
            Arc::new(MemoryProvider::new()),
            Arc::new(MemoryProvider::new()),
            configure,
        )
        .await
    }

    /// Open a pair over the given storage providers.
    pub async fn with_providers(
        seed: u8,
        writer_storage: Arc<dyn StorageProvider>,
        replica_storage: Arc<dyn StorageProvider>,
        configure: impl FnOnce(&mut DriveConfig),
    ) -> Self {
        init_tracing();
        let writer = Drive::open(writer_storage.as_ref(), writer_config(seed))
            .await
            .unwrap();

        let mut config = DriveConfig {
            fetch_timeout_ms: Some(10_000),
            ..DriveConfig::replica(&writer.key())
        };
        configure(&mut config);
        let replica = Drive::open(replica_storage.as_ref(), config).await.unwrap();

        Self { writer, replica }
    }

    /// Start replicating writer and replica with the same options.
    pub fn connect(&self, options: ReplicateOptions) -> (ReplicationHandle, ReplicationHandle) {
        connect(&self.writer, &self.replica, options, options)
    }
}

/// Connect two drives over an in-memory pipe.
pub fn connect(
    a: &Drive,
    b: &Drive,
    a_options: ReplicateOptions,
    b_options: ReplicateOptions,
) -> (ReplicationHandle, ReplicationHandle) {
    let (a_io, b_io) = tokio::io::duplex(PIPE_CAPACITY);
    (a.replicate(a_io, a_options), b.replicate(b_io, b_options))
}

/// Connect two drives through a relay that passes every frame travelling
/// from `a` to `b` through `rewrite`, along with its sequence number.
///
/// Frames from `b` to `a` are forwarded untouched.
pub fn connect_through<F>(
    a: &Drive,
    b: &Drive,
    options: ReplicateOptions,
    rewrite: F,
) -> (ReplicationHandle, ReplicationHandle)
where
    F: FnMut(u64, Vec<u8>) -> Vec<u8> + Send + 'static,
{
    let (a_io, a_relay) = tokio::io::duplex(PIPE_CAPACITY);
    let (b_io, b_relay) = tokio::io::duplex(PIPE_CAPACITY);
    let (a_read, a_write) = tokio::io::split(a_relay);
    let (b_read, b_write) = tokio::io::split(b_relay);

    tokio::spawn(relay(a_read, b_write, rewrite));
    tokio::spawn(relay(b_read, a_write, |_, frame| frame));

    (a.replicate(a_io, options), b.replicate(b_io, options))
}

/// Copy length-prefixed frames until either side closes.
async fn relay<F>(mut from: ReadHalf<DuplexStream>, mut to: WriteHalf<DuplexStream>, mut rewrite: F)
where
    F: FnMut(u64, Vec<u8>) -> Vec<u8>,
{
    let mut seq = 0;
    loop {
        let Ok(len) = from.read_u32().await else {
            break;
        };
        let mut frame = vec![0u8; len as usize];
        if from.read_exact(&mut frame).await.is_err() {
            break;
        }

        let frame = rewrite(seq, frame);
        seq += 1;

        let sent = async {
            to.write_u32(frame.len() as u32).await?;
            to.write_all(&frame).await?;
            to.flush().await
        };
        if sent.await.is_err() {
            break;
        }
    }
    let _ = to.shutdown().await;
}
