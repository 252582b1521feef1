//! Process group over a shared filesystem
//!
//! Each collective round is a directory under the run root. A rank publishes
//! its value as `rank-NNNNN` with an atomic write, then polls the directory
//! until every rank's file is visible.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use runtime_core::{CollectiveConfig, Error, Rank, Result, WorldSize};
use storage::AtomicWriter;
use tokio::fs;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::ProcessGroup;

/// Filesystem-backed group for workers that share a mount but nothing else.
///
/// `run_id` must be unique per job run: rounds are numbered from zero, so a
/// directory left over from an earlier run would be read as this run's
/// rounds.
#[derive(Debug)]
pub struct FileStoreGroup {
    /// Directory holding this run's rounds
    run_dir: PathBuf,
    rank: Rank,
    world_size: WorldSize,
    config: CollectiveConfig,
    next_round: AtomicU64,
    writer: AtomicWriter,
}

impl FileStoreGroup {
    /// Join the group rooted at `root/run_id`
    pub async fn new<P: AsRef<Path>>(
        root: P,
        run_id: &str,
        rank: Rank,
        world_size: WorldSize,
        config: CollectiveConfig,
    ) -> Result<Self> {
        if world_size == 0 || rank >= world_size {
            return Err(Error::InvalidTopology { rank, world_size });
        }
        config.validate()?;

        let run_dir = root.as_ref().join(run_id);
        fs::create_dir_all(&run_dir).await?;

        debug!(?run_dir, rank, world_size, "Joined file store group");

        Ok(Self {
            run_dir,
            rank,
            world_size,
            config,
            next_round: AtomicU64::new(0),
            writer: AtomicWriter::new(),
        })
    }

    fn round_dir(&self, round: u64) -> PathBuf {
        self.run_dir.join(format!("round-{:010}", round))
    }

    /// Values of a round once every rank has contributed
    async fn collect(&self, dir: &Path) -> Result<Option<Vec<u64>>> {
        let mut values = vec![None; self.world_size as usize];
        let mut found = 0usize;

        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(rank) = name
                .strip_prefix("rank-")
                .and_then(|r| r.parse::<usize>().ok())
            else {
                continue;
            };
            if rank >= values.len() {
                return Err(Error::CollectiveFailed {
                    message: format!("{} names rank {} outside world size {}", name, rank, self.world_size),
                });
            }

            let raw = fs::read_to_string(entry.path()).await?;
            let value = raw.trim().parse::<u64>().map_err(|e| Error::CollectiveFailed {
                message: format!("unreadable value in {}: {}", name, e),
            })?;
            if values[rank].replace(value).is_none() {
                found += 1;
            }
        }

        if found < values.len() {
            return Ok(None);
        }
        Ok(Some(values.into_iter().map(|v| v.unwrap_or_default()).collect()))
    }

    /// Rank 0 removes the round two behind; every rank has left it by now
    async fn retire(&self, round: u64) {
        if self.rank != 0 || round < 2 {
            return;
        }
        let stale = self.round_dir(round - 2);
        match fs::remove_dir_all(&stale).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = ?stale, error = %e, "Failed to remove stale round"),
        }
    }
}

#[async_trait]
impl ProcessGroup for FileStoreGroup {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> WorldSize {
        self.world_size
    }

    #[instrument(skip(self), fields(rank = self.rank))]
    async fn all_gather_u64(&self, value: u64) -> Result<Vec<u64>> {
        let round = self.next_round.fetch_add(1, Ordering::SeqCst);
        let dir = self.round_dir(round);

        self.writer
            .write(dir.join(format!("rank-{:05}", self.rank)), value.to_string())
            .await?;

        let deadline = Instant::now() + self.config.timeout;
        loop {
            if let Some(values) = self.collect(&dir).await? {
                self.retire(round).await;
                return Ok(values);
            }
            if Instant::now() >= deadline {
                return Err(Error::CollectiveTimeout {
                    operation: format!("all_gather round {}", round),
                    timeout_ms: self.config.timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
