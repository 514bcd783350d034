//! Coordinator configuration.

use serde::{Deserialize, Serialize};

use crate::error::DataSyncErrorLevel;

/// Tunables for [`crate::Coordinator`].
///
/// Deserializable with `serde`, the way [`commitlog`-style][crate] options
/// structs in this crate family are: a plain struct with a matching
/// [`Default`] impl, so it composes with whatever configuration-file format a
/// host binary uses.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// When `false`, fsync entries are removed from the pending-ops table
    /// without performing any I/O. Default: `true`.
    pub fsync_enabled: bool,
    /// Number of times a failed submission may be retried before it is
    /// reported as a persistent data-sync error. Default: 5.
    pub max_retries: u8,
    /// How many eligible pending-ops entries are processed between calls to
    /// [`crate::Coordinator::absorb`] during the main flush pass. Default: 10.
    pub fsyncs_per_absorb: u32,
    /// How many pending-unlink entries are processed between calls to
    /// [`crate::Coordinator::absorb`] during [`crate::Coordinator::post_checkpoint`].
    /// Default: 10.
    pub unlinks_per_absorb: u32,
    /// Maximum number of submissions the streaming-writer allows in flight at
    /// once. Default: 128.
    pub streaming_window: usize,
    /// Severity at which a persistent data-sync error is reported.
    /// Default: [`DataSyncErrorLevel::Error`].
    pub data_sync_error_level: DataSyncErrorLevel,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fsync_enabled: true,
            max_retries: 5,
            fsyncs_per_absorb: 10,
            unlinks_per_absorb: 10,
            streaming_window: 128,
            data_sync_error_level: DataSyncErrorLevel::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = SyncConfig::default();
        assert!(cfg.fsync_enabled);
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.fsyncs_per_absorb, 10);
        assert_eq!(cfg.unlinks_per_absorb, 10);
        assert_eq!(cfg.streaming_window, 128);
        assert_eq!(cfg.data_sync_error_level, DataSyncErrorLevel::Error);
    }
}
