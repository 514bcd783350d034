//! A deferred-fsync coordinator.
//!
//! Tracks which files need to reach stable storage before a checkpoint can be
//! considered durable, coalesces repeated requests for the same file, defers
//! unlinks until it's safe to perform them, and drives a bounded-concurrency
//! flush pass against a pluggable [`handler::SyncHandler`] vtable.
//!
//! Construct a [`Coordinator`], register one or more handlers against it via
//! a [`handler::HandlerTable`], and drive it from whatever task owns
//! checkpoints: [`Coordinator::remember_request`] (or a cloned
//! [`intake::RequestSender`] from another task) to record work, then
//! [`Coordinator::pre_checkpoint`] / [`Coordinator::process_requests`] /
//! [`Coordinator::post_checkpoint`] around each checkpoint.

mod coordinator;
mod cycle;
mod inflight;
mod pending;
mod stats;
mod tag;

pub mod config;
pub mod error;
pub mod handler;
pub mod intake;
pub mod metrics;
pub mod writer;

pub use crate::config::SyncConfig;
pub use crate::coordinator::Coordinator;
pub use crate::cycle::CycleCtr;
pub use crate::error::SyncError;
pub use crate::intake::{RequestSender, SyncRequest};
pub use crate::stats::SyncStats;
pub use crate::tag::{FileTag, HandlerId, TAG_PAYLOAD_LEN};
