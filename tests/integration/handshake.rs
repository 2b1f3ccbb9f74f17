//! Integration test: sessions that must not start.

use reef_drive::{Drive, DriveConfig, DriveError, ReplicateOptions};
use reef_integration_tests::{DrivePair, connect, init_tracing, writer_config};
use reef_store::MemoryProvider;

#[tokio::test]
#[ntest::timeout(10000)]
async fn test_encryption_mismatch_is_a_protocol_error() {
    let pair = DrivePair::new(20, |_| {}).await;
    let (a, b) = connect(
        &pair.writer,
        &pair.replica,
        ReplicateOptions::default(),
        ReplicateOptions {
            encrypt: false,
            ..ReplicateOptions::default()
        },
    );

    for session in [a, b] {
        let err = DriveError::from(session.finished().await.unwrap_err());
        assert!(err.is_protocol(), "{err}");
    }
    assert_eq!(pair.replica.version(), 0);
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn test_unencrypted_sessions_replicate() {
    let pair = DrivePair::new(21, |_| {}).await;
    pair.writer
        .write_file("/plain", "text", Default::default())
        .await
        .unwrap();

    let options = ReplicateOptions {
        encrypt: false,
        ..ReplicateOptions::default()
    };
    let (a, b) = pair.connect(options);
    a.finished().await.unwrap();
    b.finished().await.unwrap();
    assert_eq!(pair.replica.read_file("/plain").await.unwrap(), "text");
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn test_different_drives_refuse_to_replicate() {
    init_tracing();
    let provider = MemoryProvider::new();
    let one = Drive::open(&provider, writer_config(22)).await.unwrap();
    let other_provider = MemoryProvider::new();
    let two = Drive::open(&other_provider, DriveConfig::default()).await.unwrap();

    let (a, b) = connect(&one, &two, ReplicateOptions::default(), ReplicateOptions::default());
    for session in [a, b] {
        let err = DriveError::from(session.finished().await.unwrap_err());
        assert!(err.is_protocol(), "{err}");
    }
}
