//! Chaos test: a relay that corrupts frames in flight.
//!
//! Whatever the relay changes, the replica must end the session with an
//! integrity error and keep none of the corrupted data.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use reef_drive::{DriveError, ReplicateOptions, WriteOptions};
use reef_integration_tests::{DrivePair, connect_through, test_data_seeded};
use reef_net::{Channel, WireMessage};

async fn populated_pair(seed: u8) -> DrivePair {
    let pair = DrivePair::new(seed, |_| {}).await;
    for i in 0..4u64 {
        pair.writer
            .write_file(
                &format!("/blob-{i}"),
                test_data_seeded(10_000, i),
                WriteOptions::default(),
            )
            .await
            .unwrap();
    }
    pair
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn test_corrupted_block_is_rejected() {
    let pair = populated_pair(30).await;
    let tampered = Arc::new(AtomicBool::new(false));
    let flag = tampered.clone();

    let options = ReplicateOptions {
        encrypt: false,
        ..ReplicateOptions::default()
    };
    let (_writer_session, replica_session) =
        connect_through(&pair.writer, &pair.replica, options, move |seq, frame| {
            // Frame 0 is the plaintext hello.
            if seq == 0 || flag.load(Ordering::SeqCst) {
                return frame;
            }
            let Ok(WireMessage::Data {
                channel: Channel::Content,
                id,
                mut download,
            }) = WireMessage::decode(&frame)
            else {
                return frame;
            };
            let Some(proof) = download.block.as_mut() else {
                return frame;
            };
            let mut value = proof.value.to_vec();
            value[0] ^= 0x01;
            proof.value = Bytes::from(value);
            flag.store(true, Ordering::SeqCst);

            WireMessage::Data {
                channel: Channel::Content,
                id,
                download,
            }
            .encode()
            .unwrap()
        });

    let err = DriveError::from(replica_session.finished().await.unwrap_err());
    assert!(err.is_integrity(), "unexpected error {err}");
    assert!(tampered.load(Ordering::SeqCst));
    assert_eq!(pair.replica.content_log().downloaded(), 0);
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn test_corrupted_ciphertext_is_rejected() {
    let pair = populated_pair(31).await;

    let (_writer_session, replica_session) = connect_through(
        &pair.writer,
        &pair.replica,
        ReplicateOptions::default(),
        |seq, mut frame| {
            if seq == 1
                && let Some(last) = frame.last_mut()
            {
                *last ^= 0x80;
            }
            frame
        },
    );

    let err = DriveError::from(replica_session.finished().await.unwrap_err());
    assert!(err.is_integrity(), "unexpected error {err}");
    assert_eq!(pair.replica.version(), 0);
    assert_eq!(pair.replica.content_log().downloaded(), 0);
}
