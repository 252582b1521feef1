//! Runtime Core - Foundation for resumable checkpointing
//!
//! Provides the shared types, error taxonomy, configuration and logging
//! setup used by the storage, collective, checkpoint and data-shard crates.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{
    AtomicDirectoryConfig, CollectiveConfig, RuntimeConfig, SamplerConfig,
};
pub use error::{Error, Result};
pub use types::*;
