//! Storage - crash-safe persistence primitives
//!
//! Provides:
//! - [`AtomicWriter`]: replace one artifact so readers see either the old
//!   or the new complete content, never a partial file
//! - [`pointer`]: atomically retarget a "latest" symlink or pointer file
//! - [`ArtifactFormat`]: serde encodings for records persisted as artifacts
//!
//! # Example
//!
//! ```no_run
//! use storage::AtomicWriter;
//!
//! # async fn example() -> runtime_core::Result<()> {
//! let writer = AtomicWriter::new();
//! writer.write("/tmp/run/state.bin", vec![1u8, 2, 3]).await?;
//! # Ok(())
//! # }
//! ```

mod codec;
pub mod pointer;
mod writer;

pub use codec::ArtifactFormat;
pub use pointer::{read_pointer, replace_pointer};
pub use writer::{sync_directory, AtomicWriter, PendingWrite};
