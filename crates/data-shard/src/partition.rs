//! Deterministic permutation and rank partitioning
//!
//! Everything here is a pure function of its arguments, so every rank can
//! compute its own shard without talking to the others.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use runtime_core::{Epoch, Error, Rank, Result, WorldSize};

/// Reject topologies with no ranks or a rank outside the group
pub fn validate_topology(rank: Rank, world_size: WorldSize) -> Result<()> {
    if world_size == 0 || rank >= world_size {
        return Err(Error::InvalidTopology { rank, world_size });
    }
    Ok(())
}

/// Epoch permutation of `0..dataset_len`.
///
/// Identity without shuffling; otherwise a Fisher-Yates shuffle seeded by
/// `seed + epoch`.
pub fn permutation(epoch: Epoch, seed: i64, shuffle: bool, dataset_len: u64) -> Vec<u64> {
    let mut order: Vec<u64> = (0..dataset_len).collect();
    if shuffle {
        let mut rng = ChaCha8Rng::seed_from_u64((seed as u64).wrapping_add(epoch));
        order.shuffle(&mut rng);
    }
    order
}

/// Number of elements `rank` receives out of `dataset_len`.
///
/// The first `dataset_len % world_size` ranks get one extra element.
pub fn shard_len(rank: Rank, world_size: WorldSize, dataset_len: u64) -> u64 {
    let world_size = world_size as u64;
    let rank = rank as u64;
    if world_size == 0 || rank >= world_size {
        return 0;
    }
    dataset_len / world_size + u64::from(rank < dataset_len % world_size)
}

/// Shard length of every rank when the permutation tail is dropped
pub fn even_shard_len(world_size: WorldSize, dataset_len: u64) -> u64 {
    if world_size == 0 {
        return 0;
    }
    dataset_len / world_size as u64
}

/// Indices `rank` visits during `epoch`, in visiting order.
///
/// Rank `r` takes positions `r, r + W, r + 2W, ...` of the epoch
/// permutation. The union over all ranks is exactly `0..dataset_len` with no
/// padding or duplicates.
pub fn shard_assignment(
    epoch: Epoch,
    seed: i64,
    shuffle: bool,
    world_size: WorldSize,
    rank: Rank,
    dataset_len: u64,
) -> Result<Vec<u64>> {
    validate_topology(rank, world_size)?;

    let shard: Vec<u64> = permutation(epoch, seed, shuffle, dataset_len)
        .into_iter()
        .skip(rank as usize)
        .step_by(world_size as usize)
        .collect();
    debug_assert_eq!(shard.len() as u64, shard_len(rank, world_size, dataset_len));
    Ok(shard)
}
