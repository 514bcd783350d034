//! Black-box test of the cross-task producer path: a task that does not own
//! the [`Coordinator`] forwards requests through a cloned [`RequestSender`]
//! while the owning task drives checkpoints.

use std::sync::Arc;

use fsync_coordinator::handler::test_support::RecordingHandler;
use fsync_coordinator::handler::HandlerTable;
use fsync_coordinator::{Coordinator, FileTag, HandlerId, SyncConfig, SyncError, SyncRequest};

fn tag(n: u8) -> FileTag {
    FileTag::from_bytes(HandlerId(0), &[n])
}

#[tokio::test]
async fn forwarded_requests_are_absorbed_and_flushed() {
    let handler = Arc::new(RecordingHandler::default());
    let mut handlers = HandlerTable::new();
    handlers.register(HandlerId(0), handler.clone());

    let mut coordinator = Coordinator::new(SyncConfig::default(), handlers);
    let sender = coordinator.sender();

    let t1 = tag(1);
    let t2 = tag(2);
    let producer = tokio::spawn(async move {
        sender.register_request(t1, SyncRequest::Fsync, false).await.unwrap();
        sender.register_request(t2, SyncRequest::Fsync, false).await.unwrap();
    });
    producer.await.unwrap();

    let stats = coordinator.process_requests().await.unwrap();

    assert_eq!(handler.sync_count(), 2);
    assert_eq!(stats.processed, 2);
    assert_eq!(coordinator.pending_fsyncs(), 0);
}

#[tokio::test]
async fn unlink_deferred_across_a_full_checkpoint_cycle() {
    let handler = Arc::new(RecordingHandler::default());
    let mut handlers = HandlerTable::new();
    handlers.register(HandlerId(0), handler.clone());

    let mut coordinator = Coordinator::new(SyncConfig::default(), handlers);
    let sender = coordinator.sender();
    let t1 = tag(1);

    coordinator.pre_checkpoint();
    sender.register_request(t1, SyncRequest::Unlink, false).await.unwrap();
    coordinator.absorb();

    // Queued after this checkpoint's pre-hook: must not be removed yet.
    coordinator.post_checkpoint().await.unwrap();
    assert_eq!(handler.unlink_count(), 0);
    assert_eq!(coordinator.pending_unlinks_len(), 1);

    coordinator.pre_checkpoint();
    coordinator.post_checkpoint().await.unwrap();
    assert_eq!(handler.unlink_count(), 1);
    assert_eq!(coordinator.pending_unlinks_len(), 0);
}

#[tokio::test]
async fn full_queue_without_retry_reports_would_block() {
    let handler = Arc::new(RecordingHandler::default());
    let mut handlers = HandlerTable::new();
    handlers.register(HandlerId(0), handler.clone());

    // Nobody is draining the forwarding channel, so filling it past capacity
    // must surface WouldBlock rather than hang.
    let coordinator = Coordinator::new(SyncConfig::default(), handlers);
    let sender = coordinator.sender();
    let mut blocked = false;
    for n in 0..8192u32 {
        let t = FileTag::from_bytes(HandlerId(0), &n.to_le_bytes());
        match sender.register_request(t, SyncRequest::Fsync, false).await {
            Ok(()) => {}
            Err(SyncError::WouldBlock) => {
                blocked = true;
                break;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(blocked, "expected the unretried channel to eventually report WouldBlock");
}
