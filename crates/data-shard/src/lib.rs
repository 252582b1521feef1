//! Resumable sharded sampling for distributed training
//!
//! This crate provides:
//! - **Shard assignment**: a pure function from `(epoch, seed, shuffle,
//!   world_size, rank, dataset_len)` to the indices one rank visits
//! - **ResumableShardedSampler**: per-rank iteration that can be suspended
//!   at any element and resumed from a [`SamplerState`]
//! - **GroupedBatchSampler**: the same guarantees at batch granularity, with
//!   batches that never mix groups
//!
//! # Example
//!
//! ```rust
//! use data_shard::ResumableShardedSampler;
//!
//! let mut sampler = ResumableShardedSampler::new(10, 0, 3, 42, true).unwrap();
//! assert_eq!(sampler.shard_len(), 4);
//!
//! let first: Vec<u64> = sampler.iter().take(2).collect();
//! sampler.advance(2).unwrap();
//! let state = sampler.state_dict();
//!
//! // After a restart
//! let mut resumed = ResumableShardedSampler::new(10, 0, 3, 0, false).unwrap();
//! resumed.load_state_dict(state).unwrap();
//! assert_eq!(resumed.remaining(), 2);
//! # let _ = first;
//! ```

mod grouped;
mod partition;
mod sampler;

pub use grouped::GroupedBatchSampler;
pub use partition::{even_shard_len, permutation, shard_assignment, shard_len, validate_topology};
pub use sampler::ResumableShardedSampler;

// Re-export types from runtime-core for convenience
pub use runtime_core::types::{Epoch, Rank, SamplerState, WorldSize};
