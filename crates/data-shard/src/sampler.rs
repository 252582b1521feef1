//! Resumable per-rank sampler

use std::sync::Arc;

use runtime_core::{Epoch, Error, Rank, Result, SamplerConfig, SamplerState, WorldSize};
use tracing::{debug, info};

use crate::partition::{even_shard_len, shard_assignment, validate_topology};

/// Sampler yielding this rank's share of a dataset, in a deterministic order
/// that can be suspended and resumed at any element.
///
/// The whole order is derived from `(epoch, seed, shuffle)` and the
/// topology, so [`SamplerState`] is all a checkpoint needs to carry.
///
/// Resuming with a different `world_size` is accepted. The shard is
/// recomputed for the new topology and `progress` is applied to it, so for
/// the rest of that epoch ranks may see elements another rank already saw
/// (or miss elements). Exact continuation is only guaranteed when the
/// topology is unchanged; from the next epoch on coverage is exact again.
///
/// By default the first `dataset_len % world_size` ranks get one extra
/// element. With [`with_drop_last`](Self::with_drop_last) every rank gets
/// `dataset_len / world_size` and the permutation tail is skipped that epoch.
#[derive(Debug, Clone)]
pub struct ResumableShardedSampler {
    dataset_len: u64,
    rank: Rank,
    world_size: WorldSize,
    seed: i64,
    shuffle: bool,
    drop_last: bool,
    epoch: Epoch,
    progress: u64,

    /// This rank's indices for `epoch`
    indices: Arc<Vec<u64>>,
}

impl ResumableShardedSampler {
    /// Create a sampler at epoch 0
    pub fn new(
        dataset_len: u64,
        rank: Rank,
        world_size: WorldSize,
        seed: i64,
        shuffle: bool,
    ) -> Result<Self> {
        validate_topology(rank, world_size)?;

        let mut sampler = Self {
            dataset_len,
            rank,
            world_size,
            seed,
            shuffle,
            drop_last: false,
            epoch: 0,
            progress: 0,
            indices: Arc::new(Vec::new()),
        };
        sampler.recompute()?;

        debug!(
            rank,
            world_size,
            dataset_len,
            shard_len = sampler.shard_len(),
            "Created sampler"
        );
        Ok(sampler)
    }

    /// Create a sampler from configuration
    pub fn from_config(
        config: &SamplerConfig,
        dataset_len: u64,
        rank: Rank,
        world_size: WorldSize,
    ) -> Result<Self> {
        Self::new(dataset_len, rank, world_size, config.seed, config.shuffle)?
            .with_drop_last(config.drop_last)
    }

    /// Truncate every rank's shard to the same length so ranks stepping in
    /// lockstep run out together. Resets progress in the current epoch.
    pub fn with_drop_last(mut self, drop_last: bool) -> Result<Self> {
        self.drop_last = drop_last;
        self.progress = 0;
        self.recompute()?;
        Ok(self)
    }

    fn recompute(&mut self) -> Result<()> {
        let mut shard = shard_assignment(
            self.epoch,
            self.seed,
            self.shuffle,
            self.world_size,
            self.rank,
            self.dataset_len,
        )?;
        if self.drop_last {
            shard.truncate(even_shard_len(self.world_size, self.dataset_len) as usize);
        }
        self.indices = Arc::new(shard);
        Ok(())
    }

    pub fn drop_last(&self) -> bool {
        self.drop_last
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Elements consumed in the current epoch
    pub fn progress(&self) -> u64 {
        self.progress
    }

    pub fn shard_len(&self) -> u64 {
        self.indices.len() as u64
    }

    pub fn remaining(&self) -> u64 {
        self.shard_len() - self.progress
    }

    pub fn is_exhausted(&self) -> bool {
        self.progress == self.shard_len()
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn world_size(&self) -> WorldSize {
        self.world_size
    }

    /// Full shard for the current epoch, including consumed elements
    pub fn indices(&self) -> Arc<Vec<u64>> {
        Arc::clone(&self.indices)
    }

    /// Remaining indices, starting at the current progress
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.indices[self.progress as usize..].iter().copied()
    }

    /// Record that `n` elements were consumed
    pub fn advance(&mut self, n: u64) -> Result<()> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(Error::OverAdvance {
                requested: n,
                remaining,
                epoch: self.epoch,
            });
        }
        self.progress += n;
        Ok(())
    }

    /// Move to `epoch` with no progress. Every rank must call this with the
    /// same epoch.
    pub fn set_epoch(&mut self, epoch: Epoch) -> Result<()> {
        self.epoch = epoch;
        self.progress = 0;
        self.recompute()?;
        info!(rank = self.rank, epoch, shard_len = self.shard_len(), "Started epoch");
        Ok(())
    }

    /// Roll over to the next epoch once the current shard is consumed
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

    /// Resume from a saved state under the current topology.
    ///
    /// On error the sampler is left unchanged.
    pub fn load_state_dict(&mut self, state: SamplerState) -> Result<()> {
        let mut restored = Self {
            seed: state.seed,
            shuffle: state.shuffle,
            epoch: state.epoch,
            progress: 0,
            ..self.clone()
        };
        restored.recompute()?;

        if state.progress > restored.shard_len() {
            return Err(Error::ProgressOutOfRange {
                progress: state.progress,
                shard_len: restored.shard_len(),
            });
        }
        restored.progress = state.progress;

        info!(
            rank = self.rank,
            epoch = state.epoch,
            progress = state.progress,
            "Restored sampler state"
        );
        *self = restored;
        Ok(())
    }
}

impl From<&ResumableShardedSampler> for SamplerState {
    fn from(sampler: &ResumableShardedSampler) -> Self {
        sampler.state_dict()
    }
}
