//! The handler vtable: pluggable per-file-kind sync/unlink/matches.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::UnlinkError,
    tag::{FileTag, HandlerId},
};

/// A pluggable implementation of sync/unlink/matches for one kind of file.
///
/// Not every handler supports unlinking or pattern-matching; the defaults
/// here model "this handler's files are never dropped via this path" and
/// "this handler never needs pattern-cancel" respectively.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    /// Flush the file denoted by `tag` to stable storage.
    ///
    /// Implementations decide internally how to perform the I/O (a blocking
    /// `fsync(2)` dispatched via `spawn_blocking`, true async file I/O, ...);
    /// the only contract is that the returned future resolves once the flush
    /// has either completed or definitively failed.
    async fn sync(&self, tag: FileTag) -> Result<(), (crate::error::HandlerErrorKind, std::io::Error)>;

    /// Synchronously delete the file denoted by `tag`, returning its resolved
    /// path for diagnostics even when this fails is not possible.
    async fn unlink(&self, tag: FileTag) -> Result<PathBuf, UnlinkError> {
        Err(UnlinkError::Unsupported(tag))
    }

    /// `true` if `candidate` should be treated as matching `pattern` for the
    /// purposes of a `ForgetMatching` request (e.g. "all segments of this
    /// relation"). The caller has already checked `pattern.handler ==
    /// candidate.handler`.
    fn matches(&self, _pattern: &FileTag, _candidate: &FileTag) -> bool {
        false
    }
}

/// The vtable: a small map from [`HandlerId`] to the handler implementation.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<HandlerId, Arc<dyn SyncHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: HandlerId, handler: Arc<dyn SyncHandler>) {
        self.handlers.insert(id, handler);
    }

    pub fn get(&self, id: HandlerId) -> Option<&Arc<dyn SyncHandler>> {
        self.handlers.get(&id)
    }

    /// `candidate.matches(pattern)`, or `false` if the handler is unknown.
    pub fn matches(&self, pattern: &FileTag, candidate: &FileTag) -> bool {
        self.handlers
            .get(&candidate.handler)
            .map(|h| h.matches(pattern, candidate))
            .unwrap_or(false)
    }
}

/// Test doubles for exercising the coordinator without real files.
///
/// Mirrors the role `repo::Memory` plays for [`crate`]'s own test suite: a
/// backend good enough to drive the scenarios in the coordinator's tests
/// without touching a filesystem.
#[cfg(any(test, feature = "test"))]
pub mod test_support {
    use std::io;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::SyncHandler;
    use crate::error::{HandlerErrorKind, UnlinkError};
    use crate::intake::{RequestSender, SyncRequest};
    use crate::tag::FileTag;

    /// A handler whose `sync`/`unlink` outcomes are scripted by the test, and
    /// which records every call it receives for later assertion.
    #[derive(Default)]
    pub struct RecordingHandler {
        pub sync_calls: AtomicUsize,
        pub unlink_calls: AtomicUsize,
        /// Queue of outcomes `sync` should return, consumed in order, one per
        /// tag (falls back to `Ok` once exhausted).
        pub sync_script: Mutex<Vec<(FileTag, Result<(), (HandlerErrorKind, io::ErrorKind)>)>>,
        /// When set, `sync` forwards this request just before returning a
        /// scripted failure for the matching tag, so a test can reproduce a
        /// cancel arriving concurrently with the I/O failure that motivated it.
        pub cancel_signal: Mutex<Option<(FileTag, RequestSender, SyncRequest)>>,
    }

    impl RecordingHandler {
        pub fn queue_failure(&self, tag: FileTag, kind: HandlerErrorKind, io_kind: io::ErrorKind) {
            self.sync_script.lock().unwrap().push((tag, Err((kind, io_kind))));
        }

        pub fn sync_count(&self) -> usize {
            self.sync_calls.load(Ordering::SeqCst)
        }

        pub fn unlink_count(&self) -> usize {
            self.unlink_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SyncHandler for RecordingHandler {
        async fn sync(&self, tag: FileTag) -> Result<(), (HandlerErrorKind, io::Error)> {
            self.sync_calls.fetch_add(1, Ordering::SeqCst);
            let scripted = {
                let mut script = self.sync_script.lock().unwrap();
                script
                    .iter()
                    .position(|(t, _)| *t == tag)
                    .map(|i| script.remove(i))
            };
            match scripted {
                Some((_, Err((kind, io_kind)))) => {
                    let signal = self.cancel_signal.lock().unwrap().take();
                    match signal {
                        Some((target, sender, request)) if target == tag => {
                            let _ = sender.register_request(target, request, false).await;
                        }
                        Some(other) => *self.cancel_signal.lock().unwrap() = Some(other),
                        None => {}
                    }
                    Err((kind, io::Error::from(io_kind)))
                }
                _ => Ok(()),
            }
        }

        async fn unlink(&self, tag: FileTag) -> Result<PathBuf, UnlinkError> {
            self.unlink_calls.fetch_add(1, Ordering::SeqCst);
            Ok(PathBuf::from(format!("/tmp/{tag}")))
        }

        fn matches(&self, pattern: &FileTag, candidate: &FileTag) -> bool {
            pattern.handler == candidate.handler
        }
    }
}
