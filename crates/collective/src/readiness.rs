//! Pre-flight check that every rank of a group can talk to every other

use runtime_core::{Error, Result};
use tracing::info;

use crate::ProcessGroup;

/// Gather `rank + 1` from every rank and verify the sum is `W(W+1)/2`.
///
/// Catches duplicated or missing ranks and mismatched world sizes before
/// any checkpoint depends on the group.
pub async fn readiness_check<G: ProcessGroup + ?Sized>(group: &G) -> Result<()> {
    let world_size = group.world_size() as u64;
    let values = group.all_gather_u64(group.rank() as u64 + 1).await?;

    let expected = world_size * (world_size + 1) / 2;
    let actual: u64 = values.iter().sum();
    if values.len() as u64 != world_size || actual != expected {
        return Err(Error::CollectiveFailed {
            message: format!(
                "readiness check failed: expected sum {} over {} ranks, got {} over {}",
                expected,
                world_size,
                actual,
                values.len()
            ),
        });
    }

    info!(rank = group.rank(), world_size, "Process group ready");
    Ok(())
}
