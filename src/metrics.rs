//! Prometheus metrics for the coordinator, in the shape of
//! `spacetimedb-core`'s `WORKER_METRICS`/`SnapshotMetrics` helper structs.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};

use crate::stats::SyncStats;

/// Metrics published by a [`crate::Coordinator`].
///
/// Grouped into its own struct, constructed once and held alongside the
/// coordinator, rather than a global `lazy_static!` registry, since this
/// crate is embedded by callers that may run more than one coordinator per
/// process (e.g. one per database), so each needs its own label-free metric
/// set registered against whatever `Registry` the host chooses.
pub struct SyncMetrics {
    pub processed_total: IntCounter,
    pub longest_sync_micros: Histogram,
    pub total_sync_micros: IntCounter,
    pub unlinked_total: IntCounter,
    pub retried_total: IntCounter,
    pub pending_fsyncs: IntGauge,
    pub pending_unlinks: IntGauge,
}

impl SyncMetrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let processed_total = IntCounter::with_opts(Opts::new(
            "checkpoint_sync_processed_total",
            "Number of fsync requests successfully flushed across all passes.",
        ))?;
        let longest_sync_micros = Histogram::with_opts(HistogramOpts::new(
            "checkpoint_sync_longest_micros",
            "Longest single fsync observed in a pass, in microseconds.",
        ))?;
        let total_sync_micros = IntCounter::with_opts(Opts::new(
            "checkpoint_sync_total_micros",
            "Sum of fsync durations across all passes, in microseconds.",
        ))?;
        let unlinked_total = IntCounter::with_opts(Opts::new(
            "checkpoint_sync_unlinked_total",
            "Number of files removed by post_checkpoint.",
        ))?;
        let retried_total = IntCounter::with_opts(Opts::new(
            "checkpoint_sync_retried_total",
            "Number of fsync submissions that were retried after a possibly-deleted error.",
        ))?;
        let pending_fsyncs = IntGauge::with_opts(Opts::new(
            "checkpoint_sync_pending_fsyncs",
            "Current size of the pending-ops table.",
        ))?;
        let pending_unlinks = IntGauge::with_opts(Opts::new(
            "checkpoint_sync_pending_unlinks",
            "Current length of the pending-unlinks queue.",
        ))?;

        registry.register(Box::new(processed_total.clone()))?;
        registry.register(Box::new(longest_sync_micros.clone()))?;
        registry.register(Box::new(total_sync_micros.clone()))?;
        registry.register(Box::new(unlinked_total.clone()))?;
        registry.register(Box::new(retried_total.clone()))?;
        registry.register(Box::new(pending_fsyncs.clone()))?;
        registry.register(Box::new(pending_unlinks.clone()))?;

        Ok(Self {
            processed_total,
            longest_sync_micros,
            total_sync_micros,
            unlinked_total,
            retried_total,
            pending_fsyncs,
            pending_unlinks,
        })
    }

    pub(crate) fn observe_pass(&self, stats: &SyncStats) {
        self.processed_total.inc_by(stats.processed as u64);
        self.longest_sync_micros.observe(stats.longest.as_micros() as f64);
        self.total_sync_micros.inc_by(stats.total_elapsed.as_micros() as u64);
    }
}
