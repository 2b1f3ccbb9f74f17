//! Tests for the trie crate.


use std::sync::Arc;

use reef_log::{GetOptions, Log, LogOptions};
use reef_store::MemoryProvider;
use reef_types::{DEFAULT_FILE_MODE, EntryKind, Keypair, LogKind, Stat};

use crate::trie::Trie;

/// Open an initialised trie over a fresh in-memory metadata log.
async fn test_trie(cache_size: usize) -> Trie {
    let provider = MemoryProvider::new();
    let keypair = Keypair::from_secret_bytes(&[21u8; 32]);
    let log = Log::open(
        &provider,
        LogOptions {
            kind: LogKind::Metadata,
            key: keypair.public_key(),
            keypair: Some(keypair),
            cache_size: 0,
        },
    )
    .await
    .unwrap();
    let trie = Trie::new(Arc::new(log), cache_size, GetOptions::local());
    trie.init().await.unwrap();
    trie
}

/// A file record whose size identifies it.
fn file_stat(size: u64) -> Stat {
    Stat {
        kind: EntryKind::File,
        size,
        blocks: size.div_ceil(64),
        offset: 0,
        byte_offset: 0,
        mode: DEFAULT_FILE_MODE,
        mtime: size,
        ctime: size,
    }
}
