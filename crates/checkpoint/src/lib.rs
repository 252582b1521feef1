//! Checkpoint directories for distributed training
//!
//! An [`AtomicDirectory`] hands out one numbered generation directory per
//! save cycle and, once every worker has finished writing into it, publishes
//! it by atomically replacing the `<name>-latest` pointer. Older generations
//! are pruned according to `keep_last`; generations published with
//! `force_save` are kept forever.
//!
//! ```text
//! <output_directory>/
//!     checkpoint-0000000007/      previous generation (retained)
//!     checkpoint-0000000008/      published generation
//!         .generation.json
//!         model.bin
//!     checkpoint-latest -> checkpoint-0000000008
//! ```

mod directory;
mod generation;
mod retention;

pub use directory::{AtomicDirectory, DirectoryState};
pub use generation::{Generation, GenerationInfo};
