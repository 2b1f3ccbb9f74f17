//! Tests for the log crate.


use reef_store::StorageProvider;
use reef_types::{Keypair, LogKind};

use crate::log::{Log, LogOptions};

/// Deterministic keypair from a seed.
fn test_keypair(seed: u8) -> Keypair {
    Keypair::from_secret_bytes(&[seed; 32])
}

/// Open a writable content log.
async fn writer(provider: &dyn StorageProvider, seed: u8, cache_size: usize) -> Log {
    let keypair = test_keypair(seed);
    Log::open(
        provider,
        LogOptions {
            kind: LogKind::Content,
            key: keypair.public_key(),
            keypair: Some(keypair),
            cache_size,
        },
    )
    .await
    .unwrap()
}

/// Open a read-only replica of the log written with `seed`.
async fn replica(provider: &dyn StorageProvider, seed: u8) -> Log {
    Log::open(
        provider,
        LogOptions {
            kind: LogKind::Content,
            key: test_keypair(seed).public_key(),
            keypair: None,
            cache_size: 16,
        },
    )
    .await
    .unwrap()
}

/// Copy the head and every block of `from` into `to`.
async fn sync_all(from: &Log, to: &Log) {
    if let Some(download) = from.serve(None, to.length()).await.unwrap() {
        to.apply_download(download).await.unwrap();
    }
    for index in 0..from.length() {
        if to.has(index) {
            continue;
        }
        let download = from
            .serve(Some(index), to.length())
            .await
            .unwrap()
            .unwrap();
        let applied = to.apply_download(download).await.unwrap();
        assert_eq!(applied.block, Some(index));
    }
}

/// Blocks of distinct sizes so byte offsets are non-trivial.
fn blocks(count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| vec![i as u8; 10 + (i * 7) % 23])
        .collect()
}
