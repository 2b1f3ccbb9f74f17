//! Integration test: sparse, live replication.
//!
//! The replica stores only what its readers ask for, and keeps following
//! the writer while the session stays open.

use futures_lite::StreamExt;
use reef_drive::{ReadStreamOptions, ReplicateOptions, SessionState, WriteOptions};
use reef_integration_tests::{DrivePair, TEST_BLOCK_SIZE, test_data_seeded};

fn live() -> ReplicateOptions {
    ReplicateOptions {
        live: true,
        ..ReplicateOptions::default()
    }
}

#[tokio::test]
#[ntest::timeout(30000)]
async fn test_sparse_replica_fetches_on_read() {
    let pair = DrivePair::new(10, |c| {
        c.sparse = true;
        c.sparse_metadata = true;
    })
    .await;

    let mut files = Vec::new();
    for i in 0..10u64 {
        let path = format!("/data/{i}");
        let data = test_data_seeded(3 * TEST_BLOCK_SIZE, 100 + i);
        pair.writer
            .write_file(&path, data.clone(), WriteOptions::default())
            .await
            .unwrap();
        files.push((path, data));
    }

    let (writer_session, replica_session) = pair.connect(live());
    pair.replica
        .wait_for_version(pair.writer.version())
        .await
        .unwrap();

    let (path, data) = &files[7];
    assert_eq!(pair.replica.read_file(path).await.unwrap(), data.as_slice());

    let content = pair.replica.content_log();
    assert!(content.downloaded() > 0);
    assert!(
        content.downloaded() < pair.writer.content_log().length(),
        "sparse replica downloaded {} of {} blocks",
        content.downloaded(),
        pair.writer.content_log().length()
    );

    // A windowed stream over another file.
    let (path, data) = &files[2];
    let mut stream = pair.replica.create_read_stream(
        path,
        ReadStreamOptions {
            start: 100,
            length: Some(5000),
        },
    );
    let mut read = Vec::new();
    while let Some(chunk) = stream.next().await {
        read.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(read, &data[100..5100]);

    assert!(pair.replica.stat("/data").await.unwrap().is_directory());

    writer_session.close();
    writer_session.finished().await.unwrap();
    replica_session.finished().await.unwrap();
}

#[tokio::test]
#[ntest::timeout(30000)]
async fn test_live_replica_follows_new_writes() {
    let pair = DrivePair::new(11, |c| c.sparse = true).await;
    pair.writer
        .write_file("/before", "written before connecting", WriteOptions::default())
        .await
        .unwrap();

    let (writer_session, replica_session) = pair.connect(live());
    pair.replica
        .wait_for_version(pair.writer.version())
        .await
        .unwrap();
    assert_eq!(
        pair.replica.read_file_to_string("/before").await.unwrap(),
        "written before connecting"
    );

    for round in 0..5u64 {
        let path = format!("/after/{round}");
        let data = test_data_seeded(TEST_BLOCK_SIZE + 17, round);
        pair.writer
            .write_file(&path, data.clone(), WriteOptions::default())
            .await
            .unwrap();

        pair.replica
            .wait_for_version(pair.writer.version())
            .await
            .unwrap();
        assert_eq!(pair.replica.read_file(&path).await.unwrap(), data.as_slice());

        // A second new file is read only as a stream, so the stream does
        // its own fetching.
        let streamed_path = format!("/streamed/{round}");
        let streamed = test_data_seeded(2 * TEST_BLOCK_SIZE + 5, 100 + round);
        pair.writer
            .write_file(&streamed_path, streamed.clone(), WriteOptions::default())
            .await
            .unwrap();
        pair.replica
            .wait_for_version(pair.writer.version())
            .await
            .unwrap();

        let mut stream = pair
            .replica
            .create_read_stream(&streamed_path, ReadStreamOptions::default());
        let mut read = Vec::new();
        while let Some(chunk) = stream.next().await {
            read.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(read, streamed, "{streamed_path}");
    }
    assert_eq!(pair.replica.readdir("/after").await.unwrap().len(), 5);
    assert_eq!(pair.replica.readdir("/streamed").await.unwrap().len(), 5);

    replica_session.close();
    let state = replica_session.subscribe();
    replica_session.finished().await.unwrap();
    assert_eq!(*state.borrow(), SessionState::Closed);
    writer_session.finished().await.unwrap();
}

#[tokio::test]
#[ntest::timeout(30000)]
async fn test_sparse_download_prefetches_directory() {
    let pair = DrivePair::new(12, |c| c.sparse = true).await;
    for i in 0..4u64 {
        pair.writer
            .write_file(
                &format!("/pics/{i}.raw"),
                test_data_seeded(2 * TEST_BLOCK_SIZE, i),
                WriteOptions::default(),
            )
            .await
            .unwrap();
    }
    pair.writer
        .write_file("/other", test_data_seeded(TEST_BLOCK_SIZE, 9), WriteOptions::default())
        .await
        .unwrap();

    let (writer_session, replica_session) = pair.connect(live());
    pair.replica
        .wait_for_version(pair.writer.version())
        .await
        .unwrap();

    pair.replica.download("/pics").await.unwrap();
    let content = pair.replica.content_log();
    assert_eq!(content.missing_in(0, 8), Vec::<u64>::new());
    assert!(!content.has(8), "the file outside the directory was fetched");

    writer_session.close();
    writer_session.finished().await.unwrap();
    replica_session.finished().await.unwrap();
}

#[tokio::test]
#[ntest::timeout(30000)]
async fn test_sparse_metadata_stat() {
    let pair = DrivePair::new(13, |c| {
        c.sparse = true;
        c.sparse_metadata = true;
    })
    .await;

    let mut paths = Vec::new();
    for i in 0..40u64 {
        let path = format!("/tree/{}/{i}", i % 5);
        pair.writer
            .write_file(&path, test_data_seeded(64, i), WriteOptions::default())
            .await
            .unwrap();
        paths.push(path);
    }

    let (writer_session, replica_session) = pair.connect(live());
    pair.replica
        .wait_for_version(pair.writer.version())
        .await
        .unwrap();

    let stat = pair.replica.stat(&paths[17]).await.unwrap();
    assert_eq!(stat, pair.writer.stat(&paths[17]).await.unwrap());
    let metadata = pair.replica.metadata_log();
    assert!(
        metadata.downloaded() < metadata.length(),
        "one stat downloaded {} of {} metadata blocks",
        metadata.downloaded(),
        metadata.length()
    );
    assert_eq!(pair.replica.content_log().downloaded(), 0);

    for path in &paths {
        assert_eq!(
            pair.replica.stat(path).await.unwrap(),
            pair.writer.stat(path).await.unwrap(),
            "{path}"
        );
    }
    assert!(pair.replica.stat("/tree/3").await.unwrap().is_directory());

    writer_session.close();
    writer_session.finished().await.unwrap();
    replica_session.finished().await.unwrap();
}
