//! In-process process group
//!
//! Every collective call is a numbered round in a shared rendezvous table.
//! The last rank to arrive publishes the gathered values to the waiters and
//! retires the round.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use runtime_core::{Error, Rank, Result, WorldSize};
use tokio::sync::oneshot;
use tracing::trace;

use crate::ProcessGroup;

/// One collective round
struct Round {
    /// Expected participants
    expected: usize,
    inner: Mutex<RoundInner>,
}

struct RoundInner {
    /// Values contributed so far, by rank
    values: Vec<Option<u64>>,
    /// Arrived participants
    arrived: usize,
    /// Channels to notify waiting ranks
    waiters: Vec<oneshot::Sender<Arc<Vec<u64>>>>,
}

impl Round {
    fn new(expected: usize) -> Self {
        Self {
            expected,
            inner: Mutex::new(RoundInner {
                values: vec![None; expected],
                arrived: 0,
                waiters: Vec::new(),
            }),
        }
    }
}

/// Shared state behind all handles of one group
struct Rendezvous {
    world_size: WorldSize,
    /// Active rounds: round number -> Round
    rounds: DashMap<u64, Arc<Round>>,
}

/// Handle to an in-process group, one per rank.
///
/// Handles are `Send + Sync`, so each can be moved into its own thread or
/// task.
pub struct LocalGroup {
    rank: Rank,
    fabric: Arc<Rendezvous>,
    next_round: AtomicU64,
}

impl LocalGroup {
    /// Create a group of `world_size` ranks, returning handles ordered by rank
    pub fn new(world_size: WorldSize) -> Result<Vec<LocalGroup>> {
        if world_size == 0 {
            return Err(Error::InvalidTopology {
                rank: 0,
                world_size,
            });
        }

        let fabric = Arc::new(Rendezvous {
            world_size,
            rounds: DashMap::new(),
        });

        Ok((0..world_size)
            .map(|rank| LocalGroup {
                rank,
                fabric: Arc::clone(&fabric),
                next_round: AtomicU64::new(0),
            })
            .collect())
    }

    /// Single-rank group for non-distributed runs
    pub fn solo() -> LocalGroup {
        LocalGroup {
            rank: 0,
            fabric: Arc::new(Rendezvous {
                world_size: 1,
                rounds: DashMap::new(),
            }),
            next_round: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl ProcessGroup for LocalGroup {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> WorldSize {
        self.fabric.world_size
    }

    async fn all_gather_u64(&self, value: u64) -> Result<Vec<u64>> {
        let round_id = self.next_round.fetch_add(1, Ordering::SeqCst);
        let expected = self.fabric.world_size as usize;

        // Get or create round state - avoid holding the entry lock
        let round = self
            .fabric
            .rounds
            .entry(round_id)
            .or_insert_with(|| Arc::new(Round::new(expected)))
            .clone();

        let rx = {
            let mut inner = round.inner.lock();
            let slot = &mut inner.values[self.rank as usize];
            if slot.is_some() {
                return Err(Error::CollectiveFailed {
                    message: format!("rank {} entered round {} twice", self.rank, round_id),
                });
            }
            *slot = Some(value);
            inner.arrived += 1;

            trace!(
                rank = self.rank,
                round = round_id,
                arrived = inner.arrived,
                expected = round.expected,
                "Rank arrived at round"
            );

            if inner.arrived == round.expected {
                // Last rank to arrive - release all waiters
                let values: Arc<Vec<u64>> =
                    Arc::new(inner.values.iter().map(|v| v.unwrap_or_default()).collect());
                for waiter in inner.waiters.drain(..) {
                    let _ = waiter.send(Arc::clone(&values));
                }
                drop(inner);
                self.fabric.rounds.remove(&round_id);
                return Ok(values.to_vec());
            }

            let (tx, rx) = oneshot::channel();
            inner.waiters.push(tx);
            rx
        };

        let values = rx.await.map_err(|_| Error::CollectiveFailed {
            message: format!("round {} abandoned", round_id),
        })?;
        Ok(values.to_vec())
    }
}
