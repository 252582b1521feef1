//! Resumable batch sampler whose batches never mix groups
//!
//! Useful when samples must be batched with similar ones, e.g. images
//! bucketed by aspect ratio. Progress is counted in batches.

use std::sync::Arc;

use runtime_core::{Epoch, Error, Rank, Result, SamplerState, WorldSize};
use tracing::{debug, info};

use crate::partition::{shard_assignment, validate_topology};

/// Grouped, resumable batch sampler over this rank's shard.
///
/// The shard follows the same permutation and partition rule as
/// [`ResumableShardedSampler`](crate::ResumableShardedSampler). The shard is
/// then packed into `ceil(shard_len / batch_size)` full batches, each drawn
/// from a single group.
#[derive(Debug, Clone)]
pub struct GroupedBatchSampler {
    /// Group of every dataset index
    group_ids: Arc<Vec<u64>>,
    batch_size: usize,
    rank: Rank,
    world_size: WorldSize,
    seed: i64,
    shuffle: bool,
    epoch: Epoch,

    /// Batches consumed in the current epoch
    progress: u64,
    batches: Arc<Vec<Vec<u64>>>,
}

impl GroupedBatchSampler {
    /// Create a sampler at epoch 0 over `group_ids.len()` samples
    pub fn new(
        group_ids: Vec<u64>,
        batch_size: usize,
        rank: Rank,
        world_size: WorldSize,
        seed: i64,
        shuffle: bool,
    ) -> Result<Self> {
        validate_topology(rank, world_size)?;
        if batch_size == 0 {
            return Err(Error::InvalidConfig {
                message: "batch_size must be greater than zero".to_string(),
            });
        }

        let mut sampler = Self {
            group_ids: Arc::new(group_ids),
            batch_size,
            rank,
            world_size,
            seed,
            shuffle,
            epoch: 0,
            progress: 0,
            batches: Arc::new(Vec::new()),
        };
        sampler.recompute()?;
        Ok(sampler)
    }

    fn recompute(&mut self) -> Result<()> {
        let shard = shard_assignment(
            self.epoch,
            self.seed,
            self.shuffle,
            self.world_size,
            self.rank,
            self.group_ids.len() as u64,
        )?;
        self.batches = Arc::new(pack_batches(&shard, &self.group_ids, self.batch_size));

        debug!(
            rank = self.rank,
            epoch = self.epoch,
            num_batches = self.batches.len(),
            "Packed grouped batches"
        );
        Ok(())
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn progress(&self) -> u64 {
        self.progress
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_batches(&self) -> u64 {
        self.batches.len() as u64
    }

    pub fn remaining(&self) -> u64 {
        self.num_batches() - self.progress
    }

    pub fn is_exhausted(&self) -> bool {
        self.progress == self.num_batches()
    }

    /// Every batch of the current epoch, including consumed ones
    pub fn batches(&self) -> Arc<Vec<Vec<u64>>> {
        Arc::clone(&self.batches)
    }

    /// Remaining batches, starting at the current progress
    pub fn iter(&self) -> impl Iterator<Item = &[u64]> + '_ {
        self.batches[self.progress as usize..]
            .iter()
            .map(Vec::as_slice)
    }

    /// Record that one batch was consumed
    pub fn advance(&mut self) -> Result<()> {
        if self.is_exhausted() {
            return Err(Error::OverAdvance {
                requested: 1,
                remaining: 0,
                epoch: self.epoch,
            });
        }
        self.progress += 1;
        Ok(())
    }

    pub fn set_epoch(&mut self, epoch: Epoch) -> Result<()> {
        self.epoch = epoch;
        self.progress = 0;
        self.recompute()?;
        info!(rank = self.rank, epoch, num_batches = self.num_batches(), "Started epoch");
        Ok(())
    }

    pub fn next_epoch(&mut self) -> Result<Epoch> {
        if !self.is_exhausted() {
            return Err(Error::EpochNotExhausted {
                epoch: self.epoch,
                remaining: self.remaining(),
            });
        }
        self.set_epoch(self.epoch + 1)?;
        Ok(self.epoch)
    }

    pub fn state_dict(&self) -> SamplerState {
        SamplerState {
            epoch: self.epoch,
            progress: self.progress,
            seed: self.seed,
            shuffle: self.shuffle,
        }
    }

    /// Resume from a saved state. On error the sampler is left unchanged.
    pub fn load_state_dict(&mut self, state: SamplerState) -> Result<()> {
        let mut restored = Self {
            seed: state.seed,
            shuffle: state.shuffle,
            epoch: state.epoch,
            progress: 0,
            ..self.clone()
        };
        restored.recompute()?;

        if state.progress > restored.num_batches() {
            return Err(Error::ProgressOutOfRange {
                progress: state.progress,
                shard_len: restored.num_batches(),
            });
        }
        restored.progress = state.progress;
        *self = restored;
        Ok(())
    }
}

/// Pack `shard` into single-group batches of exactly `batch_size`.
///
/// Full batches are emitted in the order they fill up. The partial buffers
/// left at the end complete the count, largest first, topped up by cycling
/// through their own group's samples.
fn pack_batches(shard: &[u64], group_ids: &[u64], batch_size: usize) -> Vec<Vec<u64>> {
    let num_batches = shard.len().div_ceil(batch_size);
    let mut batches = Vec::with_capacity(num_batches);

    // Open buffers in the order they were started
    let mut buffers: Vec<(u64, Vec<u64>)> = Vec::new();
    let mut samples_per_group: Vec<(u64, Vec<u64>)> = Vec::new();

    for &idx in shard {
        let group = group_ids[idx as usize];

        match samples_per_group.iter_mut().find(|(g, _)| *g == group) {
            Some((_, samples)) => samples.push(idx),
            None => samples_per_group.push((group, vec![idx])),
        }

        let pos = match buffers.iter().position(|(g, _)| *g == group) {
            Some(pos) => pos,
            None => {
                buffers.push((group, Vec::with_capacity(batch_size)));
                buffers.len() - 1
            }
        };
        buffers[pos].1.push(idx);
        if buffers[pos].1.len() == batch_size {
            let (_, full) = buffers.remove(pos);
            batches.push(full);
        }
    }

    // Stable, so equal-sized buffers keep their start order
    buffers.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
    for (group, mut buffer) in buffers {
        if batches.len() == num_batches {
            break;
        }
        let samples = samples_per_group
            .iter()
            .find(|(g, _)| *g == group)
            .map(|(_, s)| s.as_slice())
            .unwrap_or_default();
        let missing = batch_size - buffer.len();
        buffer.extend(samples.iter().cycle().take(missing));
        batches.push(buffer);
    }

    debug_assert_eq!(batches.len(), num_batches);
    batches
}
