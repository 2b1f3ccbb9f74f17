//! Tests for the replication crate.

mod channel_tests;

use std::sync::Arc;

use reef_log::{Log, LogOptions};
use reef_store::MemoryProvider;
use reef_types::{Keypair, LogKind, PublicKey};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

use crate::message::WireMessage;
use crate::session::{Feed, ReplicateOptions, ReplicationHandle, replicate};
use crate::transport::{MessageSender, handshake};

const PIPE_CAPACITY: usize = 64 * 1024;

fn test_keypair(seed: u8) -> Keypair {
    Keypair::from_secret_bytes(&[seed; 32])
}

/// Metadata and content logs of one drive, each on its own provider.
async fn open_logs(seed: u8, writable: bool) -> [Arc<Log>; 2] {
    let keypair = test_keypair(seed);
    let provider = MemoryProvider::new();
    let mut logs = Vec::new();
    for kind in LogKind::ALL {
        let log = Log::open(
            &provider,
            LogOptions {
                kind,
                key: keypair.public_key(),
                keypair: writable.then(|| keypair.clone()),
                cache_size: 16,
            },
        )
        .await
        .unwrap();
        logs.push(Arc::new(log));
    }
    [logs[0].clone(), logs[1].clone()]
}

async fn fill(log: &Log, count: usize, tag: u8) {
    let blocks: Vec<Vec<u8>> = (0..count).map(|i| vec![tag ^ i as u8; 12 + i % 9]).collect();
    log.append_batch(&blocks).await.unwrap();
}

fn feeds(logs: &[Arc<Log>; 2], sparse: bool) -> [Feed; 2] {
    [
        Feed {
            log: logs[0].clone(),
            sparse,
        },
        Feed {
            log: logs[1].clone(),
            sparse,
        },
    ]
}

/// Connect two drives' logs through an in-memory pipe.
fn connect(
    a: &[Arc<Log>; 2],
    b: &[Arc<Log>; 2],
    b_sparse: bool,
    options: ReplicateOptions,
) -> (ReplicationHandle, ReplicationHandle) {
    let key = a[0].key();
    let (left, right) = tokio::io::duplex(PIPE_CAPACITY);
    (
        replicate(left, key, feeds(a, false), options),
        replicate(right, key, feeds(b, b_sparse), options),
    )
}

/// Scripted peer speaking the unencrypted protocol.
struct FakePeer {
    inbox: mpsc::UnboundedReceiver<WireMessage>,
    sender: MessageSender<WriteHalf<DuplexStream>>,
}

impl FakePeer {
    async fn accept(io: DuplexStream, key: PublicKey) -> Self {
        let (read_half, write_half): (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>) =
            tokio::io::split(io);
        let (mut receiver, sender) = handshake(read_half, write_half, &key, false)
            .await
            .unwrap();
        let (tx, inbox) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok(Some(message)) = receiver.recv().await {
                if tx.send(message).is_err() {
                    break;
                }
            }
        });
        Self { inbox, sender }
    }

    async fn send(&mut self, message: WireMessage) {
        self.sender.send(&message).await.unwrap();
    }

    /// Next message matching `f`, skipping the rest.
    async fn expect<T>(&mut self, f: impl Fn(&WireMessage) -> Option<T>) -> T {
        loop {
            let message = self.inbox.recv().await.expect("peer stream ended");
            if let Some(found) = f(&message) {
                return found;
            }
        }
    }
}
