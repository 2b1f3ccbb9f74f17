use std::time::Duration;

use reef_log::{GetOptions, LogEvent};
use tokio::sync::mpsc;

use super::{fill, open_logs};
use crate::channel::{ChannelState, QueuedRequest};
use crate::message::{Channel, WireMessage};

/// A content replica that trusts the writer's head but stores no blocks.
async fn head_only_replica(seed: u8, blocks: usize) -> (std::sync::Arc<reef_log::Log>, u64) {
    let writer = open_logs(seed, true).await;
    let replica = open_logs(seed, false).await;
    fill(&writer[1], blocks, seed).await;
    let download = writer[1].serve(None, 0).await.unwrap().unwrap();
    replica[1].apply_download(download).await.unwrap();
    let length = replica[1].length();
    (replica[1].clone(), length)
}

#[tokio::test]
async fn test_unwant_cancels_inflight_request() {
    let (log, length) = head_only_replica(31, 10).await;
    let (out, mut sent) = mpsc::unbounded_channel();
    let mut state = ChannelState::new(Channel::Content, log.clone(), true, out);
    state.on_sync(length, &[(0, length)]);

    let reader = {
        let log = log.clone();
        tokio::spawn(async move { log.get_with(4, GetOptions::wait(None)).await })
    };
    while log.pending_wants() != vec![4] {
        tokio::task::yield_now().await;
    }

    state.schedule(8).unwrap();
    let id = match sent.recv().await.unwrap() {
        WireMessage::Request {
            block: Some(4), id, ..
        } => id,
        other => panic!("unexpected {other:?}"),
    };
    assert!(state.is_fetching());

    reader.abort();
    let _ = reader.await;
    loop {
        match state.events.recv().await.unwrap() {
            LogEvent::Unwant { index: 4 } => {
                state.on_event(LogEvent::Unwant { index: 4 }).unwrap();
                break;
            }
            event => state.on_event(event).unwrap(),
        }
    }
    assert_eq!(
        sent.recv().await.unwrap(),
        WireMessage::Cancel {
            channel: Channel::Content,
            id
        }
    );
    assert!(!state.is_fetching());
}

#[tokio::test]
async fn test_sparse_channel_requests_nothing_unwanted() {
    let (log, length) = head_only_replica(32, 10).await;
    let (out, mut sent) = mpsc::unbounded_channel();
    let mut state = ChannelState::new(Channel::Content, log, true, out);
    state.on_sync(length, &[(0, length)]);

    state.schedule(8).unwrap();
    assert!(sent.try_recv().is_err());
    assert!(!state.is_fetching());
}

#[tokio::test]
async fn test_requests_respect_inflight_limit_and_peer_have() {
    let (log, length) = head_only_replica(33, 20).await;
    let (out, mut sent) = mpsc::unbounded_channel();
    let mut state = ChannelState::new(Channel::Content, log, false, out);

    // The peer stores only blocks 5..9.
    state.on_sync(length, &[(5, 4)]);
    state.schedule(3).unwrap();
    let mut requested = Vec::new();
    while let Ok(message) = sent.try_recv() {
        if let WireMessage::Request { block: Some(b), .. } = message {
            requested.push(b);
        }
    }
    assert_eq!(requested, vec![5, 6, 7]);

    // Full capacity: nothing more until a request completes.
    state.schedule(3).unwrap();
    assert!(sent.try_recv().is_err());
}

#[tokio::test]
async fn test_cancelled_request_is_not_served() {
    let writer = open_logs(34, true).await;
    fill(&writer[1], 5, 1).await;
    let (out, mut sent) = mpsc::unbounded_channel();
    let mut state = ChannelState::new(Channel::Content, writer[1].clone(), false, out);

    for (id, block) in [(1, 0), (2, 1), (3, 2)] {
        state
            .on_request(QueuedRequest {
                id,
                block: Some(block),
                known_length: 0,
                upgrade: true,
            })
            .unwrap();
    }
    state.on_cancel(2);
    let served = state.serve().await.unwrap();
    assert_eq!(served.blocks, 2);

    let mut answered = Vec::new();
    while let Ok(message) = sent.try_recv() {
        if let WireMessage::Data { id, download, .. } = message {
            assert!(download.upgrade.is_some());
            answered.push(id);
        }
    }
    assert_eq!(answered, vec![1, 3]);
}

#[tokio::test]
async fn test_missing_block_answered_with_no_data() {
    let (log, _) = head_only_replica(35, 4).await;
    let (out, mut sent) = mpsc::unbounded_channel();
    let mut state = ChannelState::new(Channel::Content, log.clone(), false, out);

    state
        .on_request(QueuedRequest {
            id: 9,
            block: Some(2),
            known_length: log.length(),
            upgrade: true,
        })
        .unwrap();
    state.serve().await.unwrap();
    assert_eq!(
        tokio::time::timeout(Duration::from_secs(1), sent.recv())
            .await
            .unwrap()
            .unwrap(),
        WireMessage::NoData {
            channel: Channel::Content,
            id: 9
        }
    );
}

#[tokio::test]
async fn test_request_flood_is_a_protocol_error() {
    let writer = open_logs(36, true).await;
    let (out, _sent) = mpsc::unbounded_channel();
    let mut state = ChannelState::new(Channel::Content, writer[1].clone(), false, out);
    let request = |id| QueuedRequest {
        id,
        block: Some(0),
        known_length: 0,
        upgrade: true,
    };
    for id in 0..crate::channel::MAX_QUEUED_REQUESTS as u64 {
        state.on_request(request(id)).unwrap();
    }
    assert!(
        state
            .on_request(request(u64::MAX))
            .unwrap_err()
            .is_protocol()
    );
}
