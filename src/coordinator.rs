//! The [`Coordinator`]: the owned value bundling the pending-ops table (C1),
//! pending-unlinks list (C2), both cycle counters, and the checkpoint driver
//! (C4) that used to be process-wide globals in the original design.

use log::warn;

use crate::config::SyncConfig;
use crate::cycle::CycleCtr;
use crate::error::{DataSyncErrorLevel, SyncError, UnlinkError};
use crate::handler::HandlerTable;
use crate::inflight::{InflightTracker, Outcome};
use crate::intake::{RequestSender, SyncMessage, SyncRequest};
use crate::metrics::SyncMetrics;
use crate::pending::{PendingOps, PendingUnlinks};
use crate::stats::SyncStats;
use crate::tag::FileTag;
use crate::writer::{Completion, StreamingWriter};

/// Capacity of the bounded channel producers forward requests through when
/// they don't own the [`Coordinator`] directly. Sized generously since a
/// full queue only costs a producer a short sleep, not an error,
/// unless it explicitly opts out of retrying.
const REQUEST_QUEUE_CAPACITY: usize = 4096;

/// The owned, per-database coordinator state.
///
/// Bundles what used to be `pendingOps`, `pendingUnlinks`, `sync_cycle_ctr`,
/// `checkpoint_cycle_ctr`, and `sync_state_global` as fields of a single
/// value constructed once per database and driven by whichever task performs
/// checkpoints.
pub struct Coordinator {
    pending_ops: PendingOps,
    pending_unlinks: PendingUnlinks,
    sync_cycle: CycleCtr,
    checkpoint_cycle: CycleCtr,
    sync_in_progress: bool,
    handlers: HandlerTable,
    sender: async_channel::Sender<SyncMessage>,
    receiver: async_channel::Receiver<SyncMessage>,
    config: SyncConfig,
    metrics: Option<SyncMetrics>,
    inflight: InflightTracker,
    writer: Option<StreamingWriter>,
    stats: SyncStats,
}

impl Coordinator {
    pub fn new(config: SyncConfig, handlers: HandlerTable) -> Self {
        let (sender, receiver) = async_channel::bounded(REQUEST_QUEUE_CAPACITY);
        Self {
            pending_ops: PendingOps::with_capacity(128),
            pending_unlinks: PendingUnlinks::default(),
            sync_cycle: CycleCtr::new(),
            checkpoint_cycle: CycleCtr::new(),
            sync_in_progress: false,
            handlers,
            sender,
            receiver,
            config,
            metrics: None,
            inflight: InflightTracker::default(),
            writer: None,
            stats: SyncStats::default(),
        }
    }

    /// Attach a metrics sink. See [`SyncMetrics`].
    pub fn with_metrics(mut self, metrics: SyncMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// A cheaply-cloneable handle other tasks can use to reach this
    /// coordinator without owning it.
    pub fn sender(&self) -> RequestSender {
        RequestSender::new(self.sender.clone())
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    pub fn pending_fsyncs(&self) -> usize {
        self.pending_ops.len()
    }

    pub fn pending_unlinks_len(&self) -> usize {
        self.pending_unlinks.len()
    }

    /// C3: record a request locally. Called directly by whichever task owns
    /// `self`; tasks that don't should go through [`Self::sender`] instead.
    pub fn remember_request(&mut self, tag: FileTag, kind: SyncRequest) {
        match kind {
            SyncRequest::Fsync => {
                self.pending_ops.remember_fsync(tag, self.sync_cycle);
            }
            SyncRequest::ForgetOne => {
                self.pending_ops.cancel_one(&tag);
            }
            SyncRequest::ForgetMatching => {
                self.pending_ops.cancel_matching(&tag, &self.handlers);
                self.pending_unlinks.remove_matching(&tag, &self.handlers);
            }
            SyncRequest::Unlink => {
                self.pending_unlinks.push(tag, self.checkpoint_cycle);
            }
        }
    }

    /// Drain every request forwarded by non-owning tasks into local state.
    /// Safe to call reentrantly from within a flush pass.
    pub fn absorb(&mut self) {
        while let Ok((tag, kind)) = self.receiver.try_recv() {
            self.remember_request(tag, kind);
        }
    }

    /// Pre-checkpoint hook: advance `checkpoint_cycle`. Must be called before the
    /// checkpoint's durability horizon is computed.
    pub fn pre_checkpoint(&mut self) {
        self.checkpoint_cycle = self.checkpoint_cycle.advance();
    }

    /// The main flush pass.
    pub async fn process_requests(&mut self) -> Result<SyncStats, SyncError> {
        // 1. Drain external queue.
        self.absorb();

        // 2. Stale-counter recovery.
        if self.sync_in_progress {
            warn!(
                "previous sync pass did not complete ({} inflight, {} retrying); discarding and renormalizing",
                self.inflight.inflight_len(),
                self.inflight.retry_len(),
            );
            self.inflight = InflightTracker::default();
            self.pending_ops.renormalize(self.sync_cycle);
        }

        // 3. Advance horizon.
        self.sync_cycle = self.sync_cycle.advance();

        // 4. Set in-progress; reset stats; lazily allocate the writer.
        self.sync_in_progress = true;
        let mut stats = SyncStats::default();
        let mut writer = self
            .writer
            .take()
            .unwrap_or_else(|| StreamingWriter::new(self.config.streaming_window));

        // 5. Iterate a snapshot of C1 (see `PendingOps::snapshot` for why).
        let snapshot = self.pending_ops.snapshot();
        let mut since_absorb: u32 = 0;
        for tag in snapshot {
            let Some(entry) = self.pending_ops.get(&tag).copied() else {
                continue;
            };
            if entry.cycle_ctr == self.sync_cycle {
                // Added during this pass; defer to the next one.
                continue;
            }
            debug_assert!(
                entry.cycle_ctr.is_predecessor_of(self.sync_cycle),
                "pending-ops entry for {tag} has a cycle_ctr more than one cycle behind sync_cycle",
            );

            since_absorb += 1;
            if since_absorb >= self.config.fsyncs_per_absorb {
                self.absorb();
                since_absorb = 0;
                self.fold_completions(writer.try_drain(), &mut stats)?;
            }

            // Re-read: the interleaved absorb above may have just canceled
            // this very entry.
            let Some(entry) = self.pending_ops.get(&tag).copied() else {
                continue;
            };

            if !self.config.fsync_enabled || entry.canceled {
                self.pending_ops.remove(&tag);
                continue;
            }

            let handler = self
                .handlers
                .get(tag.handler)
                .cloned()
                .unwrap_or_else(|| panic!("no handler registered for {tag}"));
            self.inflight.track(tag);
            writer.submit(handler, tag).await;
        }

        // 6. Drain inflight.
        let completions = writer.wait_all().await;
        self.fold_completions(completions, &mut stats)?;

        // 7. Retry bank.
        for _ in 0..self.config.max_retries {
            let batch = self.inflight.take_retry_batch();
            if batch.is_empty() {
                break;
            }
            self.absorb();
            for entry in batch {
                let canceled = self
                    .pending_ops
                    .get(&entry.tag)
                    .map(|e| e.canceled)
                    .unwrap_or(true);
                if canceled {
                    self.pending_ops.remove(&entry.tag);
                    continue;
                }
                let handler = self
                    .handlers
                    .get(entry.tag.handler)
                    .cloned()
                    .unwrap_or_else(|| panic!("no handler registered for {}", entry.tag));
                self.inflight.track_retry(entry);
                writer.submit(handler, entry.tag).await;
            }
            let completions = writer.wait_all().await;
            self.fold_completions(completions, &mut stats)?;
        }

        // 8. Invariants at end.
        if !self.inflight.is_empty() {
            return Err(SyncError::StateCorruption(
                "inflight/retry queues non-empty at end of pass",
            ));
        }

        // 9. Export stats, clear in-progress flag.
        if let Some(metrics) = &self.metrics {
            metrics.observe_pass(&stats);
            metrics.pending_fsyncs.set(self.pending_ops.len() as i64);
        }
        self.sync_in_progress = false;
        self.writer = Some(writer);
        self.stats = stats;
        Ok(stats)
    }

    fn fold_completions(&mut self, completions: Vec<Completion>, stats: &mut SyncStats) -> Result<(), SyncError> {
        for Completion { tag, result } in completions {
            match self.inflight.complete(tag, result, self.config.max_retries) {
                Outcome::Flushed { elapsed } => {
                    if !self.pending_ops.remove(&tag) {
                        return Err(SyncError::StateCorruption(
                            "pending-ops entry missing for a tag that just flushed successfully",
                        ));
                    }
                    stats.record(elapsed);
                }
                Outcome::Retrying => {
                    if let Some(metrics) = &self.metrics {
                        metrics.retried_total.inc();
                    }
                }
                Outcome::Fatal(err) => {
                    if self.config.data_sync_error_level == DataSyncErrorLevel::Panic {
                        panic!("data-sync error for {}: {}", err.tag, err.source);
                    }
                    return Err(SyncError::DataSync { tag, source: err });
                }
            }
        }
        Ok(())
    }

    /// Post-checkpoint hook: unlink every deferred deletion queued before the most
    /// recent [`Self::pre_checkpoint`].
    pub async fn post_checkpoint(&mut self) -> Result<(), SyncError> {
        let mut since_absorb: u32 = 0;
        loop {
            let Some(entry) = self.pending_unlinks.front().copied() else {
                break;
            };
            if entry.cycle_ctr == self.checkpoint_cycle {
                // Queued after this checkpoint's pre-hook; leave for next time.
                break;
            }

            let handler = self
                .handlers
                .get(entry.tag.handler)
                .cloned()
                .unwrap_or_else(|| panic!("no handler registered for {}", entry.tag));
            match handler.unlink(entry.tag).await {
                Ok(_path) => {}
                Err(UnlinkError::NotFound(_)) => {}
                Err(other) => warn!("could not remove file for {}: {other}", entry.tag),
            }
            self.pending_unlinks.pop_front();
            if let Some(metrics) = &self.metrics {
                metrics.unlinked_total.inc();
            }

            since_absorb += 1;
            if since_absorb >= self.config.unlinks_per_absorb {
                self.absorb();
                since_absorb = 0;
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.pending_unlinks.set(self.pending_unlinks.len() as i64);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use super::*;
    use crate::error::HandlerErrorKind;
    use crate::handler::test_support::RecordingHandler;
    use crate::handler::HandlerId;

    fn tag(n: u8) -> FileTag {
        FileTag::from_bytes(HandlerId(0), &[n])
    }

    fn single_handler_coordinator() -> (Coordinator, Arc<RecordingHandler>) {
        let handler = Arc::new(RecordingHandler::default());
        let mut handlers = HandlerTable::new();
        handlers.register(HandlerId(0), handler.clone());
        (Coordinator::new(SyncConfig::default(), handlers), handler)
    }

    #[tokio::test]
    async fn s1_basic_flush() {
        let (mut coordinator, handler) = single_handler_coordinator();
        coordinator.remember_request(tag(1), SyncRequest::Fsync);
        coordinator.remember_request(tag(2), SyncRequest::Fsync);

        let stats = coordinator.process_requests().await.unwrap();

        assert_eq!(handler.sync_count(), 2);
        assert_eq!(stats.processed, 2);
        assert_eq!(coordinator.pending_fsyncs(), 0);
    }

    #[tokio::test]
    async fn s2_dedup_keeps_one_entry_with_earlier_cycle() {
        let (mut coordinator, handler) = single_handler_coordinator();
        coordinator.remember_request(tag(1), SyncRequest::Fsync);
        coordinator.remember_request(tag(1), SyncRequest::Fsync);
        assert_eq!(coordinator.pending_fsyncs(), 1);

        let stats = coordinator.process_requests().await.unwrap();
        assert_eq!(handler.sync_count(), 1);
        assert_eq!(stats.processed, 1);
    }

    #[tokio::test]
    async fn stale_counter_recovery_retries_after_a_failed_pass() {
        let (mut coordinator, handler) = single_handler_coordinator();
        let t1 = tag(1);
        handler.queue_failure(t1, HandlerErrorKind::Other, io::ErrorKind::Other);

        coordinator.remember_request(t1, SyncRequest::Fsync);
        let err = coordinator.process_requests().await.unwrap_err();
        assert!(matches!(err, SyncError::DataSync { .. }));
        // Entry survives a fatal failure; next pass should pick it up again.
        assert_eq!(coordinator.pending_fsyncs(), 1);

        let stats = coordinator.process_requests().await.unwrap();
        assert_eq!(handler.sync_count(), 2);
        assert_eq!(stats.processed, 1);
        assert_eq!(coordinator.pending_fsyncs(), 0);
    }

    #[tokio::test]
    async fn s3_cancel_mid_pass_prevents_sync() {
        let (mut coordinator, handler) = single_handler_coordinator();
        let t1 = tag(1);
        let sender = coordinator.sender();

        coordinator.remember_request(t1, SyncRequest::Fsync);
        sender.register_request(t1, SyncRequest::ForgetOne, false).await.unwrap();

        let stats = coordinator.process_requests().await.unwrap();

        assert_eq!(handler.sync_count(), 0);
        assert_eq!(stats.processed, 0);
        assert_eq!(coordinator.pending_fsyncs(), 0);
    }

    #[tokio::test]
    async fn s4_file_gone_retry_then_canceled() {
        let (mut coordinator, handler) = single_handler_coordinator();
        let t1 = tag(1);
        handler.queue_failure(t1, HandlerErrorKind::PossiblyDeleted, io::ErrorKind::NotFound);

        let sender = coordinator.sender();
        *handler.cancel_signal.lock().unwrap() = Some((t1, sender, SyncRequest::ForgetMatching));

        coordinator.remember_request(t1, SyncRequest::Fsync);
        let stats = coordinator.process_requests().await.unwrap();

        assert_eq!(handler.sync_count(), 1, "must not retry a second time once canceled");
        assert_eq!(stats.processed, 0);
        assert_eq!(coordinator.pending_fsyncs(), 0);
    }

    #[tokio::test]
    async fn s5_unlink_ordering_waits_for_cancel() {
        let (mut coordinator, handler) = single_handler_coordinator();
        let r = tag(1);

        coordinator.remember_request(r, SyncRequest::Fsync);
        coordinator.remember_request(r, SyncRequest::ForgetMatching);
        coordinator.remember_request(r, SyncRequest::Unlink);
        coordinator.pre_checkpoint();

        let stats = coordinator.process_requests().await.unwrap();
        assert_eq!(handler.sync_count(), 0, "canceled entry must never be synced");
        assert_eq!(stats.processed, 0);

        coordinator.post_checkpoint().await.unwrap();
        assert_eq!(handler.unlink_count(), 1);
        assert_eq!(coordinator.pending_unlinks_len(), 0);
    }

    #[tokio::test]
    async fn s6_deferred_unlink_waits_a_full_checkpoint() {
        let (mut coordinator, handler) = single_handler_coordinator();
        let r = tag(1);

        coordinator.pre_checkpoint();
        coordinator.remember_request(r, SyncRequest::Unlink);

        coordinator.post_checkpoint().await.unwrap();
        assert_eq!(handler.unlink_count(), 0, "unlink queued after pre_checkpoint must wait");
        assert_eq!(coordinator.pending_unlinks_len(), 1);

        coordinator.pre_checkpoint();
        coordinator.post_checkpoint().await.unwrap();
        assert_eq!(handler.unlink_count(), 1);
        assert_eq!(coordinator.pending_unlinks_len(), 0);
    }
}
