//! C3: request intake and the producer-side handle used by tasks that don't
//! own the [`crate::Coordinator`] directly.

use std::time::Duration;

use log::warn;

use crate::error::SyncError;
use crate::tag::FileTag;

/// The four request kinds a producer may send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncRequest {
    /// Remember that `tag` needs to be flushed before the next checkpoint
    /// completes.
    Fsync,
    /// Cancel a previously-registered fsync for exactly this tag.
    ForgetOne,
    /// Cancel every previously-registered fsync, and remove every queued
    /// unlink, whose tag the owning handler's `matches` predicate accepts
    /// against this one.
    ForgetMatching,
    /// Defer deletion of `tag` until it is safe to do so (the post-checkpoint hook).
    ///
    /// Ordering rule (critical): callers must deliver a `ForgetMatching`
    /// for the same file to the owning task *before* queuing the matching
    /// `Unlink`, so that any pending fsync for the to-be-deleted file is
    /// marked canceled before deletion can proceed.
    Unlink,
}

/// A message forwarded to the task that owns the [`crate::Coordinator`].
pub type SyncMessage = (FileTag, SyncRequest);

/// Backoff between retries when [`RequestSender::register_request`] finds the
/// forwarding channel full and `retry_on_error` is set.
const FORWARD_RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// A cheaply-cloneable handle producers use to reach the owning task's
/// [`crate::Coordinator`] without holding it directly.
///
/// This is the "forward to the checkpointer" half of
/// `RegisterRequest`; the "record locally" half is just
/// [`crate::Coordinator::remember_request`], called directly by whichever
/// task happens to own the `Coordinator`.
#[derive(Clone)]
pub struct RequestSender {
    tx: async_channel::Sender<SyncMessage>,
}

impl RequestSender {
    pub(crate) fn new(tx: async_channel::Sender<SyncMessage>) -> Self {
        Self { tx }
    }

    /// Forward `(tag, kind)` to the owning task.
    ///
    /// If `retry_on_error` is `true`, a full queue is retried after a short
    /// sleep until it succeeds. Otherwise a full queue is reported as
    /// [`SyncError::WouldBlock`] immediately.
    pub async fn register_request(&self, tag: FileTag, kind: SyncRequest, retry_on_error: bool) -> Result<(), SyncError> {
        loop {
            match self.tx.try_send((tag, kind)) {
                Ok(()) => return Ok(()),
                Err(async_channel::TrySendError::Full(_)) => {
                    if !retry_on_error {
                        return Err(SyncError::WouldBlock);
                    }
                    tokio::time::sleep(FORWARD_RETRY_BACKOFF).await;
                }
                Err(async_channel::TrySendError::Closed(_)) => {
                    warn!("sync request queue closed; owning task is gone");
                    return Err(SyncError::WouldBlock);
                }
            }
        }
    }
}
