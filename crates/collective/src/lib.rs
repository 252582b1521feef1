//! Collective communication for the workers of one job
//!
//! The checkpoint layer only needs a handful of small-value collectives:
//! a barrier, a boolean all-reduce and a broadcast. They are expressed by
//! the [`ProcessGroup`] trait, whose only required operation is an
//! all-gather of one `u64` per rank, so any transport can back it:
//!
//! - [`LocalGroup`]: workers are threads or tasks of one process
//! - [`FileStoreGroup`]: workers are processes sharing a filesystem
//!
//! Every collective must be entered by every rank, in the same order. A rank
//! that skips one stalls the rest of the group.

mod file_store;
mod group;
mod local;
mod readiness;

pub use file_store::FileStoreGroup;
pub use group::{ProcessGroup, ReduceOp};
pub use local::LocalGroup;
pub use readiness::readiness_check;
