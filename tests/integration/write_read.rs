//! Integration test: one-shot full replication.
//!
//! A writer builds a tree, a non-sparse replica syncs once, and every file
//! is then readable from the replica's local storage.

use futures_lite::StreamExt;
use reef_drive::{ReplicateOptions, WriteOptions};
use reef_integration_tests::{DrivePair, test_data_seeded};

#[tokio::test]
#[ntest::timeout(30000)]
async fn test_full_sync_copies_everything() {
    let pair = DrivePair::new(1, |_| {}).await;

    let mut files = Vec::new();
    for i in 0..20u64 {
        let path = format!("/dir-{}/file-{i:02}", i % 3);
        let data = test_data_seeded(1000 + i as usize * 700, i);
        pair.writer
            .write_file(&path, data.clone(), WriteOptions::default())
            .await
            .unwrap();
        files.push((path, data));
    }
    pair.writer.unlink("/dir-0/file-00").await.unwrap();
    files.remove(0);

    let (writer_session, replica_session) = pair.connect(ReplicateOptions::default());
    writer_session.finished().await.unwrap();
    let stats = replica_session.finished().await.unwrap();
    assert!(stats.downloaded > 0);
    assert_eq!(stats.dropped, 0);

    let replica = &pair.replica;
    assert_eq!(replica.version(), pair.writer.version());
    for log in [replica.metadata_log(), replica.content_log()] {
        assert_eq!(log.downloaded(), log.length(), "{} incomplete", log.kind());
    }
    assert_eq!(
        replica.metadata_log().head(),
        pair.writer.metadata_log().head()
    );
    assert_eq!(
        replica.content_log().head(),
        pair.writer.content_log().head()
    );

    for (path, data) in &files {
        assert_eq!(replica.read_file(path).await.unwrap(), data.as_slice(), "{path}");
    }
    assert!(replica.read_file("/dir-0/file-00").await.unwrap_err().is_not_found());
    assert_eq!(replica.readdir("/").await.unwrap(), vec!["dir-0", "dir-1", "dir-2"]);
    assert_eq!(
        replica.readdir("/dir-1").await.unwrap(),
        pair.writer.readdir("/dir-1").await.unwrap()
    );

    let mut entries = replica.create_directory_stream("/");
    let mut count = 0;
    while let Some(entry) = entries.next().await {
        let entry = entry.unwrap();
        assert_eq!(entry.stat, pair.writer.stat(&entry.path).await.unwrap());
        count += 1;
    }
    assert_eq!(count, files.len());
}

#[tokio::test]
#[ntest::timeout(30000)]
async fn test_sync_is_incremental() {
    let pair = DrivePair::new(2, |_| {}).await;
    pair.writer
        .write_file("/first", "one", WriteOptions::default())
        .await
        .unwrap();

    let (a, b) = pair.connect(ReplicateOptions::default());
    a.finished().await.unwrap();
    b.finished().await.unwrap();
    let synced = pair.replica.content_log().length();

    pair.writer
        .write_file("/second", "two", WriteOptions::default())
        .await
        .unwrap();

    let (a, b) = pair.connect(ReplicateOptions::default());
    a.finished().await.unwrap();
    let stats = b.finished().await.unwrap();
    assert!(stats.downloaded >= 1);
    assert!(pair.replica.content_log().length() > synced);

    assert_eq!(pair.replica.read_file("/first").await.unwrap(), "one");
    assert_eq!(pair.replica.read_file("/second").await.unwrap(), "two");
}

#[tokio::test]
#[ntest::timeout(30000)]
async fn test_replica_checkout_matches_writer() {
    let pair = DrivePair::new(3, |_| {}).await;
    pair.writer
        .write_file("/doc", "draft", WriteOptions::default())
        .await
        .unwrap();
    let draft = pair.writer.version();
    pair.writer
        .write_file("/doc", "final", WriteOptions::default())
        .await
        .unwrap();

    let (a, b) = pair.connect(ReplicateOptions::default());
    a.finished().await.unwrap();
    b.finished().await.unwrap();

    let old = pair.replica.checkout(draft).unwrap();
    assert_eq!(old.read_file("/doc").await.unwrap(), "draft");
    assert_eq!(pair.replica.read_file("/doc").await.unwrap(), "final");
}
