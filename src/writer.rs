//! The streaming-writer interface: a bounded-window submission engine
//! for asynchronous handler I/O.
//!
//! This crate does not implement a real AIO/io_uring engine, that being out of
//! scope, but provides a `tokio`-task-based stand-in good enough to
//! drive the coordinator's bounded-concurrency contract: at most
//! `streaming_window` handler calls may be in flight at once, and completions
//! are drained through a channel rather than delivered via a callback.

use std::io;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};

use crate::error::HandlerErrorKind;
use crate::handler::SyncHandler;
use crate::tag::FileTag;

/// The outcome of a single submitted sync, paired with the tag it was for.
pub struct Completion {
    pub tag: FileTag,
    pub result: Result<(), (HandlerErrorKind, io::Error)>,
}

/// A bounded-window async submission engine.
///
/// `alloc`/`wait_all`/`free` in the original vtable map onto
/// [`StreamingWriter::new`], [`StreamingWriter::wait_all`], and `Drop`
/// respectively.
pub struct StreamingWriter {
    window: Arc<Semaphore>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    outstanding: usize,
}

impl StreamingWriter {
    pub fn new(window_size: usize) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            window: Arc::new(Semaphore::new(window_size.max(1))),
            completions_tx,
            completions_rx,
            outstanding: 0,
        }
    }

    /// Begin an asynchronous flush of `tag` via `handler`.
    ///
    /// Blocks (asynchronously) until a submission slot in the bounded window
    /// is free; while blocked, the caller is effectively draining completions
    /// for the duration of this call's `.await`, since `tokio` is free to run
    /// other tasks (in particular the completion-sending tasks of prior
    /// submissions) while this one awaits a permit.
    pub async fn submit(&mut self, handler: Arc<dyn SyncHandler>, tag: FileTag) {
        let permit = self.window.clone().acquire_owned().await.expect("semaphore never closed");
        let tx = self.completions_tx.clone();
        self.outstanding += 1;
        tokio::spawn(async move {
            let result = handler.sync(tag).await;
            let _ = tx.send(Completion { tag, result });
            drop(permit);
        });
    }

    /// Await every outstanding submission's completion.
    ///
    /// Returns the completions in the order they arrived, for the caller
    /// ([`crate::Coordinator::process_requests`]) to fold into C1/retry state.
    pub async fn wait_all(&mut self) -> Vec<Completion> {
        let mut out = Vec::with_capacity(self.outstanding);
        while self.outstanding > 0 {
            let completion = self
                .completions_rx
                .recv()
                .await
                .expect("sender half kept alive by self");
            self.outstanding -= 1;
            out.push(completion);
        }
        out
    }

    /// Non-blocking drain of whatever completions have already arrived,
    /// without waiting for the whole window to empty. Used by the main flush
    /// loop to interleave `absorb()` with in-flight completions instead of
    /// only ever waiting at the very end of a pass.
    pub fn try_drain(&mut self) -> Vec<Completion> {
        let mut out = Vec::new();
        while let Ok(completion) = self.completions_rx.try_recv() {
            self.outstanding -= 1;
            out.push(completion);
        }
        out
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }
}
