//! Tests for the drive crate.


use futures_lite::StreamExt;
use reef_store::MemoryProvider;
use reef_types::Keypair;

use crate::config::DriveConfig;
use crate::drive::{DirectoryStream, Drive};

/// A writable in-memory drive with small blocks so files span several.
async fn test_drive(config: DriveConfig) -> Drive {
    let provider = MemoryProvider::new();
    Drive::open(&provider, config).await.unwrap()
}

fn small_blocks(seed: u8) -> DriveConfig {
    DriveConfig {
        content_block_size: Some(4),
        ..DriveConfig::writable(&Keypair::from_secret_bytes(&[seed; 32]))
    }
}

async fn collect_paths(mut entries: DirectoryStream) -> Vec<String> {
    let mut paths = Vec::new();
    while let Some(entry) = entries.next().await {
        paths.push(entry.unwrap().path);
    }
    paths.sort();
    paths
}
