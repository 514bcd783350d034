//! A small CLI that drives a [`Coordinator`] against real files on disk.
//!
//! Writes `--files` regular files into `--dir`, registers an `Fsync` request
//! for each, runs one checkpoint pass, and optionally queues them for
//! deferred deletion across a second checkpoint.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;

use fsync_coordinator::handler::{HandlerTable, SyncHandler};
use fsync_coordinator::{Coordinator, FileTag, HandlerId, SyncConfig, SyncRequest};

#[derive(Parser)]
#[command(about = "Drive a deferred-fsync coordinator against real files")]
struct Cli {
    /// Directory the demo writes its files into.
    #[arg(long, default_value = "./coordinator-demo-data")]
    dir: PathBuf,

    /// Number of files to create and fsync.
    #[arg(long, default_value_t = 8)]
    files: u32,

    /// Queue every file for deferred deletion after the first checkpoint.
    #[arg(long)]
    unlink: bool,
}

const SEGMENTS_HANDLER: HandlerId = HandlerId(0);

/// Interprets a [`FileTag`]'s payload as a little-endian `u32` segment id
/// naming a file under a fixed directory.
struct SegmentFiles {
    dir: PathBuf,
}

impl SegmentFiles {
    fn path_for(&self, tag: FileTag) -> PathBuf {
        let id = u32::from_le_bytes(tag.payload[..4].try_into().unwrap());
        self.dir.join(format!("segment-{id:08}.dat"))
    }

    fn tag_for(id: u32) -> FileTag {
        let mut payload = id.to_le_bytes().to_vec();
        payload.resize(fsync_coordinator::TAG_PAYLOAD_LEN, 0);
        FileTag::new(SEGMENTS_HANDLER, payload.try_into().unwrap())
    }
}

#[async_trait]
impl SyncHandler for SegmentFiles {
    async fn sync(&self, tag: FileTag) -> Result<(), (fsync_coordinator::error::HandlerErrorKind, io::Error)> {
        let path = self.path_for(tag);
        tokio::task::spawn_blocking(move || std::fs::File::open(&path)?.sync_all())
            .await
            .expect("sync task panicked")
            .map_err(|e| (fsync_coordinator::error::HandlerErrorKind::from_io(&e), e))
    }

    async fn unlink(&self, tag: FileTag) -> Result<PathBuf, fsync_coordinator::error::UnlinkError> {
        let path = self.path_for(tag);
        let result = tokio::task::spawn_blocking({
            let path = path.clone();
            move || std::fs::remove_file(&path)
        })
        .await
        .expect("unlink task panicked");

        match result {
            Ok(()) => Ok(path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(fsync_coordinator::error::UnlinkError::NotFound(tag)),
            Err(source) => Err(fsync_coordinator::error::UnlinkError::Io { tag, source }),
        }
    }

    fn matches(&self, pattern: &FileTag, candidate: &FileTag) -> bool {
        pattern.handler == candidate.handler
    }
}

fn write_segment(dir: &Path, id: u32) -> anyhow::Result<()> {
    let path = dir.join(format!("segment-{id:08}.dat"));
    std::fs::write(&path, format!("segment {id}\n")).with_context(|| format!("writing {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.dir).with_context(|| format!("creating {}", cli.dir.display()))?;

    let mut handlers = HandlerTable::new();
    handlers.register(
        SEGMENTS_HANDLER,
        Arc::new(SegmentFiles { dir: cli.dir.clone() }),
    );
    let mut coordinator = Coordinator::new(SyncConfig::default(), handlers);

    for id in 0..cli.files {
        write_segment(&cli.dir, id)?;
        coordinator.remember_request(SegmentFiles::tag_for(id), SyncRequest::Fsync);
    }

    coordinator.pre_checkpoint();
    let stats = coordinator.process_requests().await.context("flush pass failed")?;
    println!(
        "flushed {} file(s); longest={:?} total={:?}",
        stats.processed, stats.longest, stats.total_elapsed
    );

    if cli.unlink {
        for id in 0..cli.files {
            coordinator.remember_request(SegmentFiles::tag_for(id), SyncRequest::Unlink);
        }
        coordinator.post_checkpoint().await.context("deferred unlink on the same checkpoint")?;
        println!("{} pending unlink(s) left for the next checkpoint", coordinator.pending_unlinks_len());

        coordinator.pre_checkpoint();
        coordinator.post_checkpoint().await.context("deferred unlink post-checkpoint")?;
        println!("{} pending unlink(s) remaining", coordinator.pending_unlinks_len());
    }

    Ok(())
}
