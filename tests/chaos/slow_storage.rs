//! Chaos test: slow storage under concurrent readers and writers.
//!
//! Both sides sit on storage with random latency. Concurrent writes must
//! all land, and concurrent sparse reads on the replica must all return
//! the right bytes.

use std::sync::Arc;

use reef_drive::{ReplicateOptions, WriteOptions};
use reef_integration_tests::{DrivePair, TEST_BLOCK_SIZE, test_data_seeded};
use reef_store::{Latency, MemoryProvider, SlowProvider};

#[tokio::test]
#[ntest::timeout(60000)]
async fn test_concurrent_io_on_slow_storage() {
    let writer_storage = Arc::new(SlowProvider::new(
        Arc::new(MemoryProvider::new()),
        Latency::ms(0, 3),
        Latency::ms(1, 4),
        7,
    ));
    let replica_storage = Arc::new(SlowProvider::new(
        Arc::new(MemoryProvider::new()),
        Latency::ms(0, 3),
        Latency::ms(1, 4),
        8,
    ));
    let pair = DrivePair::with_providers(40, writer_storage, replica_storage, |c| {
        c.sparse = true;
    })
    .await;

    let mut writes = Vec::new();
    for i in 0..8u64 {
        let writer = pair.writer.clone();
        writes.push(tokio::spawn(async move {
            let data = test_data_seeded(2 * TEST_BLOCK_SIZE + i as usize, i);
            writer
                .write_file(&format!("/w/{i}"), data.clone(), WriteOptions::default())
                .await
                .unwrap();
            data
        }));
    }
    let mut expected = Vec::new();
    for (i, write) in writes.into_iter().enumerate() {
        expected.push((format!("/w/{i}"), write.await.unwrap()));
    }
    assert_eq!(pair.writer.readdir("/w").await.unwrap().len(), 8);

    let (writer_session, replica_session) = pair.connect(ReplicateOptions {
        live: true,
        max_inflight: 4,
        ..ReplicateOptions::default()
    });
    pair.replica
        .wait_for_version(pair.writer.version())
        .await
        .unwrap();

    let mut reads = Vec::new();
    for (path, data) in expected {
        let replica = pair.replica.clone();
        reads.push(tokio::spawn(async move {
            let got = replica.read_file(&path).await.unwrap();
            assert_eq!(got, data.as_slice(), "{path}");
        }));
    }
    for read in reads {
        read.await.unwrap();
    }
    assert_eq!(
        pair.replica.content_log().downloaded(),
        pair.writer.content_log().length()
    );

    writer_session.close();
    writer_session.finished().await.unwrap();
    replica_session.finished().await.unwrap();
}
