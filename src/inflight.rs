//! C5: the inflight and retry trackers for asynchronous completions.

use std::collections::HashMap;
use std::time::Instant;

use log::debug;

use crate::error::{HandlerError, HandlerErrorKind};
use crate::tag::FileTag;

/// Bookkeeping for a single in-flight (or retrying) submission.
///
/// Rather than a back-pointer into the owning [`crate::pending::PendingOps`]
/// row, `tag` itself is the stable handle used to re-locate it, avoiding an
/// arena or any unsafe pointer games to link the two tables together.
#[derive(Clone, Copy, Debug)]
pub struct InflightSync {
    pub tag: FileTag,
    pub retry_count: u8,
    pub submitted_at: Instant,
}

/// Outcome of folding one handler completion into the tracker.
pub enum Outcome {
    /// The sync succeeded; caller should remove `tag`'s row from C1 and fold
    /// `elapsed` into the pass stats.
    Flushed { elapsed: std::time::Duration },
    /// The failure was transient and has been queued for another attempt;
    /// nothing further to do right now.
    Retrying,
    /// The failure is terminal: either it wasn't a "possibly deleted" kind,
    /// or it was but this was already a retry.
    Fatal(HandlerError),
}

/// Owns the inflight and retry sets (C5).
#[derive(Default)]
pub struct InflightTracker {
    inflight: HashMap<FileTag, InflightSync>,
    retry: Vec<InflightSync>,
}

impl InflightTracker {
    /// Record a fresh submission as in flight.
    pub fn track(&mut self, tag: FileTag) {
        self.inflight.insert(
            tag,
            InflightSync {
                tag,
                retry_count: 0,
                submitted_at: Instant::now(),
            },
        );
    }

    /// Fold a handler completion into the tracker.
    pub fn complete(
        &mut self,
        tag: FileTag,
        result: Result<(), (HandlerErrorKind, std::io::Error)>,
        max_retries: u8,
    ) -> Outcome {
        let Some(entry) = self.inflight.remove(&tag) else {
            // Already handled (e.g. canceled out from under a stale
            // completion); nothing to do.
            return Outcome::Retrying;
        };

        match result {
            Ok(()) => Outcome::Flushed {
                elapsed: entry.submitted_at.elapsed(),
            },
            Err((kind, source)) => {
                if kind == HandlerErrorKind::PossiblyDeleted && entry.retry_count < max_retries {
                    debug!("could not fsync {tag} but retrying: {source}");
                    self.retry.push(InflightSync {
                        retry_count: entry.retry_count + 1,
                        ..entry
                    });
                    Outcome::Retrying
                } else {
                    Outcome::Fatal(HandlerError { tag, kind, source })
                }
            }
        }
    }

    /// Drain the retry queue for one retry-bank pass.
    pub fn take_retry_batch(&mut self) -> Vec<InflightSync> {
        std::mem::take(&mut self.retry)
    }

    /// Re-track an entry pulled off the retry queue after it was resubmitted.
    pub fn track_retry(&mut self, entry: InflightSync) {
        self.inflight.insert(entry.tag, entry);
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty() && self.retry.is_empty()
    }

    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    pub fn retry_len(&self) -> usize {
        self.retry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerId;
    use std::io;

    fn tag() -> FileTag {
        FileTag::from_bytes(HandlerId(0), &[7])
    }

    #[test]
    fn success_flushes_and_clears_inflight() {
        let mut tracker = InflightTracker::default();
        tracker.track(tag());
        match tracker.complete(tag(), Ok(()), 5) {
            Outcome::Flushed { .. } => {}
            _ => panic!("expected Flushed"),
        }
        assert!(tracker.is_empty());
    }

    #[test]
    fn possibly_deleted_first_failure_retries_once() {
        let mut tracker = InflightTracker::default();
        tracker.track(tag());
        let err = (HandlerErrorKind::PossiblyDeleted, io::Error::from(io::ErrorKind::NotFound));
        match tracker.complete(tag(), Err(err), 5) {
            Outcome::Retrying => {}
            _ => panic!("expected Retrying"),
        }
        assert_eq!(tracker.retry_len(), 1);
        assert_eq!(tracker.inflight_len(), 0);

        let batch = tracker.take_retry_batch();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].retry_count, 1);
    }

    #[test]
    fn possibly_deleted_second_failure_is_fatal() {
        let mut tracker = InflightTracker::default();
        tracker.inflight.insert(
            tag(),
            InflightSync {
                tag: tag(),
                retry_count: 1,
                submitted_at: Instant::now(),
            },
        );
        let err = (HandlerErrorKind::PossiblyDeleted, io::Error::from(io::ErrorKind::NotFound));
        match tracker.complete(tag(), Err(err), 1) {
            Outcome::Fatal(_) => {}
            _ => panic!("expected Fatal"),
        }
    }

    #[test]
    fn other_error_is_immediately_fatal() {
        let mut tracker = InflightTracker::default();
        tracker.track(tag());
        let err = (HandlerErrorKind::Other, io::Error::other("disk on fire"));
        match tracker.complete(tag(), Err(err), 5) {
            Outcome::Fatal(_) => {}
            _ => panic!("expected Fatal"),
        }
    }
}
