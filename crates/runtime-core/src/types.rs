//! Core type definitions shared across the workspace

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Worker position in the process group
pub type Rank = u32;
pub type WorldSize = u32;

/// Iteration counters
pub type Epoch = u64;
pub type SequenceNumber = u64;

/// Resumable sampler progress.
///
/// `progress` counts items (or batches, for the grouped sampler) already
/// consumed by this worker within `epoch`. The field set is fixed; any
/// richer application checkpoint should embed this record as one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SamplerState {
    pub epoch: Epoch,
    pub progress: u64,
    pub seed: i64,
    pub shuffle: bool,
}

/// How per-worker `force_save` flags are combined during publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStrategy {
    /// Preserve if any worker asked for it
    #[default]
    Any,

    /// Preserve only if every worker asked for it
    All,
}

impl fmt::Display for SaveStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveStrategy::Any => write!(f, "any"),
            SaveStrategy::All => write!(f, "all"),
        }
    }
}

impl FromStr for SaveStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any" => Ok(SaveStrategy::Any),
            "all" => Ok(SaveStrategy::All),
            other => Err(Error::InvalidConfig {
                message: format!("unknown save strategy '{}', expected 'any' or 'all'", other),
            }),
        }
    }
}

/// Retention window derived from `keep_last`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Never prune anything
    KeepAll,

    /// Keep the newest `n` non-preserved generations older than the published one
    KeepLast(usize),
}

impl RetentionPolicy {
    /// Negative values mean unbounded retention
    pub fn from_keep_last(keep_last: i64) -> Self {
        if keep_last < 0 {
            RetentionPolicy::KeepAll
        } else {
            RetentionPolicy::KeepLast(keep_last as usize)
        }
    }
}

/// Record written into a generation directory when it is published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationManifest {
    /// Saver name owning the generation
    pub name: String,

    /// Generation sequence number
    pub sequence: SequenceNumber,

    /// Exempt from retention pruning
    pub preserved: bool,

    /// Process group size at publish time
    pub world_size: WorldSize,

    /// Timestamp when the generation was published
    pub published_at: DateTime<Utc>,
}

impl GenerationManifest {
    /// File name of the manifest inside a generation directory
    pub const FILE_NAME: &'static str = ".generation.json";

    pub fn new(name: &str, sequence: SequenceNumber, preserved: bool, world_size: WorldSize) -> Self {
        Self {
            name: name.to_string(),
            sequence,
            preserved,
            world_size,
            published_at: Utc::now(),
        }
    }
}
