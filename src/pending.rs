//! C1 (pending-ops table) and C2 (pending-unlinks list).

use std::collections::{HashMap, VecDeque};

use crate::{cycle::CycleCtr, handler::HandlerTable, tag::FileTag};

/// A single outstanding fsync request, deduplicated by [`FileTag`].
#[derive(Clone, Copy, Debug)]
pub struct PendingFsync {
    /// Cycle at which the *oldest* outstanding request for this tag was
    /// entered. Never advanced while the entry exists.
    pub cycle_ctr: CycleCtr,
    /// Set when a `ForgetOne`/`ForgetMatching` cancels this tag. Cleared only
    /// when a fresh fsync request re-enters the (then-canceled) slot.
    pub canceled: bool,
}

/// A single deferred deletion, tagged with the `checkpoint_cycle` in effect
/// when it was enqueued.
#[derive(Clone, Copy, Debug)]
pub struct PendingUnlink {
    pub tag: FileTag,
    pub cycle_ctr: CycleCtr,
}

/// The deduplicating set of outstanding fsync requests (C1).
///
/// Backed by a [`HashMap`] rather than an open-addressed table with
/// `hash_seq_search`, so unlike the original design we cannot mutate an entry
/// while a `hash_seq_search`-style cursor is mid-scan. [`PendingOps::snapshot`]
/// exists precisely to let [`crate::Coordinator::process_requests`] take a
/// consistent key list up front and iterate that instead, which reproduces the
/// documented behavior that entries inserted after the scan starts may or may
/// not be visited.
#[derive(Debug, Default)]
pub struct PendingOps {
    table: HashMap<FileTag, PendingFsync>,
}

impl PendingOps {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            table: HashMap::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn get(&self, tag: &FileTag) -> Option<&PendingFsync> {
        self.table.get(tag)
    }

    /// Insert a fresh fsync request, or leave an existing uncancelled entry
    /// untouched so its `cycle_ctr` keeps denoting the oldest request.
    ///
    /// Returns `true` if the entry was (re-)initialized with `sync_cycle`.
    pub fn remember_fsync(&mut self, tag: FileTag, sync_cycle: CycleCtr) -> bool {
        match self.table.entry(tag) {
            std::collections::hash_map::Entry::Vacant(v) => {
                v.insert(PendingFsync {
                    cycle_ctr: sync_cycle,
                    canceled: false,
                });
                true
            }
            std::collections::hash_map::Entry::Occupied(mut o) => {
                if o.get().canceled {
                    o.insert(PendingFsync {
                        cycle_ctr: sync_cycle,
                        canceled: false,
                    });
                    true
                } else {
                    // Oldest request wins; leave cycle_ctr untouched.
                    false
                }
            }
        }
    }

    /// `ForgetOne`: cancel a single tag if present. No-op if absent.
    pub fn cancel_one(&mut self, tag: &FileTag) {
        if let Some(entry) = self.table.get_mut(tag) {
            entry.canceled = true;
        }
    }

    /// `ForgetMatching`: cancel every entry whose handler matches `pattern`'s
    /// and whose tag the handler's [`SyncHandler::matches`][crate::handler::SyncHandler::matches]
    /// predicate accepts.
    pub fn cancel_matching(&mut self, pattern: &FileTag, handlers: &HandlerTable) {
        for (candidate, entry) in self.table.iter_mut() {
            if candidate.handler == pattern.handler && handlers.matches(pattern, candidate) {
                entry.canceled = true;
            }
        }
    }

    /// Force every surviving entry's `cycle_ctr` to `sync_cycle`. Used by the
    /// stale-counter recovery path when a previous pass failed to complete.
    pub fn renormalize(&mut self, sync_cycle: CycleCtr) {
        for entry in self.table.values_mut() {
            entry.cycle_ctr = sync_cycle;
        }
    }

    /// Snapshot the current keys for a stable iteration order during a flush
    /// pass. See the struct-level docs for why this is needed.
    pub fn snapshot(&self) -> Vec<FileTag> {
        self.table.keys().copied().collect()
    }

    /// Remove an entry. Returns `true` if it was present.
    pub fn remove(&mut self, tag: &FileTag) -> bool {
        self.table.remove(tag).is_some()
    }
}

/// The FIFO of deferred deletions (C2).
#[derive(Debug, Default)]
pub struct PendingUnlinks {
    queue: VecDeque<PendingUnlink>,
}

impl PendingUnlinks {
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn push(&mut self, tag: FileTag, checkpoint_cycle: CycleCtr) {
        self.queue.push_back(PendingUnlink {
            tag,
            cycle_ctr: checkpoint_cycle,
        });
    }

    pub fn front(&self) -> Option<&PendingUnlink> {
        self.queue.front()
    }

    pub fn pop_front(&mut self) -> Option<PendingUnlink> {
        self.queue.pop_front()
    }

    /// `ForgetMatching`'s C2 half: remove every queued unlink whose handler
    /// matches and whose tag the handler's `matches` predicate accepts.
    pub fn remove_matching(&mut self, pattern: &FileTag, handlers: &HandlerTable) {
        self.queue
            .retain(|entry| !(entry.tag.handler == pattern.handler && handlers.matches(pattern, &entry.tag)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{test_support::RecordingHandler, HandlerId};

    fn tag(n: u8) -> FileTag {
        FileTag::from_bytes(HandlerId(0), &[n])
    }

    fn handlers() -> HandlerTable {
        let mut t = HandlerTable::new();
        t.register(HandlerId(0), std::sync::Arc::new(RecordingHandler::default()));
        t
    }

    #[test]
    fn remember_fsync_dedups_keeping_oldest_cycle() {
        let mut ops = PendingOps::default();
        assert!(ops.remember_fsync(tag(1), CycleCtr::new()));
        let five = CycleCtr::new().advance().advance().advance().advance().advance();
        // Re-registering the same tag at a later cycle must not move cycle_ctr.
        assert!(!ops.remember_fsync(tag(1), five));
        assert_eq!(ops.get(&tag(1)).unwrap().cycle_ctr, CycleCtr::new());
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn cancel_then_refsync_gets_new_cycle() {
        let mut ops = PendingOps::default();
        let c0 = CycleCtr::new();
        ops.remember_fsync(tag(1), c0);
        ops.cancel_one(&tag(1));
        assert!(ops.get(&tag(1)).unwrap().canceled);

        let c1 = c0.advance();
        assert!(ops.remember_fsync(tag(1), c1));
        let entry = ops.get(&tag(1)).unwrap();
        assert_eq!(entry.cycle_ctr, c1);
        assert!(!entry.canceled);
    }

    #[test]
    fn cancel_matching_uses_handler_predicate() {
        let hs = handlers();
        let mut ops = PendingOps::default();
        ops.remember_fsync(tag(1), CycleCtr::new());
        ops.remember_fsync(tag(2), CycleCtr::new());
        // RecordingHandler::matches treats equal payload prefix as a match;
        // here we cancel everything for handler 0.
        ops.cancel_matching(&tag(0), &hs);
        assert!(ops.get(&tag(1)).unwrap().canceled);
        assert!(ops.get(&tag(2)).unwrap().canceled);
    }

    #[test]
    fn unlinks_fifo_order() {
        let mut unlinks = PendingUnlinks::default();
        unlinks.push(tag(1), CycleCtr::new());
        unlinks.push(tag(2), CycleCtr::new());
        assert_eq!(unlinks.pop_front().unwrap().tag, tag(1));
        assert_eq!(unlinks.pop_front().unwrap().tag, tag(2));
        assert!(unlinks.pop_front().is_none());
    }

    #[test]
    fn unlinks_remove_matching() {
        let hs = handlers();
        let mut unlinks = PendingUnlinks::default();
        unlinks.push(tag(1), CycleCtr::new());
        unlinks.push(tag(2), CycleCtr::new());
        unlinks.remove_matching(&tag(0), &hs);
        assert!(unlinks.is_empty());
    }
}
