//! End-to-end training simulation test
//!
//! Simulates a distributed training job with:
//! - Several workers sharing one checkpoint root through a `LocalGroup`
//! - Per-rank sampler state saved inside each published generation
//! - A crash in the middle of a save cycle
//! - A restart that resumes every rank from the latest pointer

use anyhow::Result;
use checkpoint::AtomicDirectory;
use collective::{LocalGroup, ProcessGroup};
use data_shard::ResumableShardedSampler;
use runtime_core::{AtomicDirectoryConfig, SamplerState, SaveStrategy};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storage::{ArtifactFormat, AtomicWriter};
use tempfile::TempDir;
use tracing::info;

const DATASET_LEN: u64 = 240;
const WORLD_SIZE: u32 = 3;
const SEED: i64 = 1234;
/// Indices each rank pulls per step; 80-element shards make 10 steps an epoch
const BATCH: usize = 8;
const SAVE_EVERY: usize = 4;

fn sampler_file(rank: u32) -> String {
    format!("sampler-rank-{}.json", rank)
}

/// Simulates a training worker
struct SimulatedWorker {
    rank: u32,
    dir: AtomicDirectory,
    sampler: ResumableShardedSampler,
    writer: AtomicWriter,

    /// Indices pulled since start or restart
    consumed: Vec<u64>,

    /// Length of `consumed` at the last successful publish
    committed: usize,
}

impl SimulatedWorker {
    async fn start(root: &Path, group: LocalGroup, keep_last: i64) -> Result<Self> {
        let rank = group.rank();
        let config = AtomicDirectoryConfig::new(root)
            .with_master(rank == 0)
            .with_keep_last(keep_last);
        let dir = AtomicDirectory::open(config, Arc::new(group)).await?;

        let mut sampler = ResumableShardedSampler::new(DATASET_LEN, rank, WORLD_SIZE, SEED, true)?;
        if let Some(latest) = dir.latest().await? {
            let state: SamplerState =
                AtomicWriter::read_encoded(latest.join(sampler_file(rank)), ArtifactFormat::Json)
                    .await?;
            sampler.load_state_dict(state)?;
            info!(rank, ?latest, "Resumed from checkpoint");
        }

        Ok(Self {
            rank,
            dir,
            sampler,
            writer: AtomicWriter::new(),
            consumed: Vec::new(),
            committed: 0,
        })
    }

    fn step(&mut self) -> Result<()> {
        if self.sampler.is_exhausted() {
            self.sampler.next_epoch()?;
        }
        let batch: Vec<u64> = self.sampler.iter().take(BATCH).collect();
        self.sampler.advance(batch.len() as u64)?;
        self.consumed.extend(batch);
        Ok(())
    }

    async fn save(&mut self, force_save: bool) -> Result<bool> {
        let generation = self.dir.prepare_next_generation().await?;
        self.writer
            .write_encoded(
                generation.path().join(sampler_file(self.rank)),
                ArtifactFormat::Json,
                &self.sampler.state_dict(),
            )
            .await?;
        if self.rank == 0 {
            self.writer
                .write(generation.path().join("model.bin"), vec![7u8; 4096])
                .await?;
        }

        let preserved = self
            .dir
            .publish(&generation, force_save, SaveStrategy::Any)
            .await?;
        self.committed = self.consumed.len();
        Ok(preserved)
    }

    /// Run `steps` steps, saving every `SAVE_EVERY`
    async fn train(&mut self, steps: usize, force_on: Option<usize>) -> Result<()> {
        for i in 1..=steps {
            self.step()?;
            if i % SAVE_EVERY == 0 {
                self.save(force_on == Some(i) && self.rank == 1).await?;
            }
        }
        Ok(())
    }

    /// Pull one more step, start a save and die before publishing
    async fn crash_mid_save(mut self) -> Result<Vec<u64>> {
        self.step()?;
        let generation = self.dir.prepare_next_generation().await?;
        let pending = self
            .writer
            .stage(generation.path().join(sampler_file(self.rank)), vec![0u8; 64])
            .await?;
        std::mem::forget(pending);

        self.consumed.truncate(self.committed);
        Ok(self.consumed)
    }
}

/// What one rank sees when nothing ever goes wrong
fn uninterrupted(rank: u32, steps: usize) -> Result<Vec<u64>> {
    let mut sampler = ResumableShardedSampler::new(DATASET_LEN, rank, WORLD_SIZE, SEED, true)?;
    let mut out = Vec::new();
    for _ in 0..steps {
        if sampler.is_exhausted() {
            sampler.next_epoch()?;
        }
        let batch: Vec<u64> = sampler.iter().take(BATCH).collect();
        sampler.advance(batch.len() as u64)?;
        out.extend(batch);
    }
    Ok(out)
}

async fn run_phase<F, Fut, T>(root: PathBuf, f: F) -> Result<Vec<T>>
where
    F: Fn(PathBuf, LocalGroup) -> Fut,
    Fut: std::future::Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let tasks: Vec<_> = LocalGroup::new(WORLD_SIZE)?
        .into_iter()
        .map(|group| tokio::spawn(f(root.clone(), group)))
        .collect();

    let mut out = Vec::new();
    for task in tasks {
        out.push(task.await??);
    }
    Ok(out)
}

#[tokio::test]
async fn test_crash_and_resume_matches_uninterrupted_run() -> Result<()> {
    runtime_core::logging::try_init(runtime_core::logging::DEFAULT_DIRECTIVES);
    let tmp = TempDir::new()?;
    let root = tmp.path().join("checkpoints");

    // Phase 1: 12 steps with saves after 4, 8 and 12, then a crash in step 13
    let before = run_phase(root.clone(), |root, group| async move {
        let mut worker = SimulatedWorker::start(&root, group, 1).await?;
        worker.train(12, None).await?;
        worker.crash_mid_save().await
    })
    .await?;

    let latest = AtomicDirectory::resolve_latest(&root, "checkpoint")
        .await?
        .expect("a generation was published");
    assert_eq!(latest, root.join("checkpoint-0000000003"));
    assert!(latest.join("model.bin").exists());

    // Phase 2: restart and run 13 more steps
    let after = run_phase(root.clone(), |root, group| async move {
        let mut worker = SimulatedWorker::start(&root, group, 1).await?;
        assert_eq!(worker.dir.next_sequence(), 5);
        for _ in 0..13 {
            worker.step()?;
        }
        worker.save(false).await?;
        Ok::<_, anyhow::Error>(worker.consumed)
    })
    .await?;

    for rank in 0..WORLD_SIZE {
        let mut resumed = before[rank as usize].clone();
        resumed.extend(&after[rank as usize]);
        assert_eq!(resumed, uninterrupted(rank, 25)?, "rank {}", rank);
    }

    // The orphan from the crash is gone, one older generation is retained
    let sequences: Vec<u64> = std::fs::read_dir(&root)?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            name.strip_prefix("checkpoint-")?.parse().ok()
        })
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();
    assert_eq!(sequences, vec![3, 5]);

    Ok(())
}

#[tokio::test]
async fn test_every_epoch_covers_dataset_once() -> Result<()> {
    let tmp = TempDir::new()?;
    let root = tmp.path().to_path_buf();

    // Two full epochs: 10 steps each
    let consumed = run_phase(root, |root, group| async move {
        let mut worker = SimulatedWorker::start(&root, group, 0).await?;
        worker.train(20, None).await?;
        Ok::<_, anyhow::Error>(worker.consumed)
    })
    .await?;

    for epoch in 0..2 {
        let mut seen: Vec<u64> = consumed
            .iter()
            .flat_map(|c| c[epoch * 80..(epoch + 1) * 80].iter().copied())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..DATASET_LEN).collect::<Vec<_>>(), "epoch {}", epoch);
    }
    Ok(())
}

#[tokio::test]
async fn test_force_saved_generation_survives_restarts() -> Result<()> {
    let tmp = TempDir::new()?;
    let root = tmp.path().to_path_buf();

    // Rank 1 alone asks to keep the generation saved after step 8
    run_phase(root.clone(), |root, group| async move {
        let mut worker = SimulatedWorker::start(&root, group, 0).await?;
        worker.train(16, Some(8)).await
    })
    .await?;

    let dir = AtomicDirectory::open(
        AtomicDirectoryConfig::new(&root),
        Arc::new(LocalGroup::solo()),
    )
    .await?;
    let generations: Vec<(u64, bool)> = dir
        .generations()
        .await?
        .into_iter()
        .map(|g| (g.sequence, g.is_preserved()))
        .collect();
    assert_eq!(generations, vec![(2, true), (4, false)]);
    drop(dir);

    run_phase(root.clone(), |root, group| async move {
        let mut worker = SimulatedWorker::start(&root, group, 0).await?;
        worker.train(4, None).await
    })
    .await?;

    assert!(root.join("checkpoint-0000000002").exists());
    assert!(!root.join("checkpoint-0000000004").exists());
    assert!(root.join("checkpoint-0000000005").exists());
    Ok(())
}
