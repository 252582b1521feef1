//! Process group trait definition

use std::sync::Arc;

use async_trait::async_trait;
use runtime_core::{Error, Rank, Result, SaveStrategy, WorldSize};

/// Boolean reduction applied across ranks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Any,
    All,
}

impl ReduceOp {
    fn apply(self, values: &[u64]) -> bool {
        match self {
            ReduceOp::Any => values.iter().any(|v| *v != 0),
            ReduceOp::All => values.iter().all(|v| *v != 0),
        }
    }
}

impl From<SaveStrategy> for ReduceOp {
    fn from(strategy: SaveStrategy) -> Self {
        match strategy {
            SaveStrategy::Any => ReduceOp::Any,
            SaveStrategy::All => ReduceOp::All,
        }
    }
}

/// Async collective operations over a fixed set of ranks
///
/// Implementors provide `all_gather_u64`; the barrier, reduction and
/// broadcast are built on it. Results are identical on every rank.
#[async_trait]
pub trait ProcessGroup: Send + Sync {
    /// This worker's rank
    fn rank(&self) -> Rank;

    /// Number of ranks in the group
    fn world_size(&self) -> WorldSize;

    /// Gather one value from every rank, ordered by rank
    async fn all_gather_u64(&self, value: u64) -> Result<Vec<u64>>;

    /// Wait until every rank has arrived
    async fn barrier(&self) -> Result<()> {
        self.all_gather_u64(0).await.map(|_| ())
    }

    /// Combine one flag per rank with `op`
    async fn all_reduce_bool(&self, flag: bool, op: ReduceOp) -> Result<bool> {
        let flags = self.all_gather_u64(flag as u64).await?;
        Ok(op.apply(&flags))
    }

    /// Every rank receives `root`'s value
    async fn broadcast_u64(&self, value: u64, root: Rank) -> Result<u64> {
        if root >= self.world_size() {
            return Err(Error::InvalidTopology {
                rank: root,
                world_size: self.world_size(),
            });
        }
        let values = self.all_gather_u64(value).await?;
        values
            .get(root as usize)
            .copied()
            .ok_or_else(|| Error::CollectiveFailed {
                message: format!("gather returned {} values, root is {}", values.len(), root),
            })
    }
}

#[async_trait]
impl<G: ProcessGroup + ?Sized> ProcessGroup for Arc<G> {
    fn rank(&self) -> Rank {
        (**self).rank()
    }

    fn world_size(&self) -> WorldSize {
        (**self).world_size()
    }

    async fn all_gather_u64(&self, value: u64) -> Result<Vec<u64>> {
        (**self).all_gather_u64(value).await
    }

    async fn barrier(&self) -> Result<()> {
        (**self).barrier().await
    }

    async fn all_reduce_bool(&self, flag: bool, op: ReduceOp) -> Result<bool> {
        (**self).all_reduce_bool(flag, op).await
    }

    async fn broadcast_u64(&self, value: u64, root: Rank) -> Result<u64> {
        (**self).broadcast_u64(value, root).await
    }
}
