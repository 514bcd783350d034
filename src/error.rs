//! Errors surfaced by the coordinator and its handler vtable.

use std::io;

use thiserror::Error;

use crate::tag::FileTag;

/// Coarse classification of a handler-reported failure.
///
/// Mirrors the "is this file possibly gone" distinction the original design
/// makes by inspecting `errno`: a fresh [`io::Error`] is classified once, at
/// the point the handler reports it, rather than re-inspected later.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerErrorKind {
    /// The file may have been concurrently unlinked or truncated away. Worth
    /// one retry after an absorb, since a pending cancel may explain it.
    PossiblyDeleted,
    /// Any other failure; never retried.
    Other,
}

impl HandlerErrorKind {
    pub fn from_io(e: &io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => Self::PossiblyDeleted,
            _ => Self::Other,
        }
    }
}

/// Error reported by a [`crate::handler::SyncHandler::sync`] completion.
#[derive(Debug, Error)]
#[error("fsync failed for {tag}")]
pub struct HandlerError {
    pub tag: FileTag,
    pub kind: HandlerErrorKind,
    #[source]
    pub source: io::Error,
}

/// Error returned by [`crate::handler::SyncHandler::unlink`].
#[derive(Debug, Error)]
pub enum UnlinkError {
    /// The file was already gone; callers should treat this as success.
    #[error("file for {0} not found")]
    NotFound(FileTag),
    /// Some other I/O failure.
    #[error("failed to unlink {tag}")]
    Io {
        tag: FileTag,
        #[source]
        source: io::Error,
    },
    /// This handler does not support unlinking files at all.
    #[error("handler for {0} does not support unlink")]
    Unsupported(FileTag),
}

/// Severity to report a persistent data-sync failure at.
///
/// See [`crate::config::SyncConfig::data_sync_error_level`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DataSyncErrorLevel {
    /// Return the error to the caller of [`crate::Coordinator::process_requests`].
    #[default]
    Error,
    /// Panic instead of returning. Use when a host process considers a
    /// persistent data-sync failure non-recoverable.
    Panic,
}

/// Top-level error returned by the coordinator's public operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A handler reported a failure that was not transient, or was transient
    /// but persisted across a retry.
    #[error("persistent data-sync error for {tag}")]
    DataSync {
        tag: FileTag,
        #[source]
        source: HandlerError,
    },

    /// The inflight or retry tracking state was non-empty at the end of a
    /// pass, or an expected pending-ops entry was missing on removal. This
    /// indicates a bug in this crate, not in a caller or handler.
    #[error("pending-ops state corrupted: {0}")]
    StateCorruption(&'static str),

    /// Forwarding a request to the owning task failed and the caller asked
    /// not to retry.
    #[error("request queue is full")]
    WouldBlock,
}
