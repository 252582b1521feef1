//! Runtime configuration types

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::RetentionPolicy;
use crate::{Error, Result};

/// Main runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Checkpoint directory settings
    pub checkpoint: AtomicDirectoryConfig,

    /// Sampler settings
    pub sampler: SamplerConfig,

    /// Collective communication settings
    pub collective: CollectiveConfig,
}

impl RuntimeConfig {
    /// Load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: RuntimeConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all sections
    pub fn validate(&self) -> Result<()> {
        self.checkpoint.validate()?;
        self.collective.validate()
    }
}

/// Atomic checkpoint directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AtomicDirectoryConfig {
    /// Root directory holding generations and the latest pointer
    pub output_directory: PathBuf,

    /// Whether this worker writes the latest pointer
    pub is_master: bool,

    /// Saver name, used as the generation directory prefix
    pub name: String,

    /// Non-preserved generations to keep besides the published one (negative = all)
    pub keep_last: i64,

    /// Upper bound on each collective step of a publish
    #[serde(with = "humantime_serde")]
    pub publish_timeout: Duration,
}

impl Default for AtomicDirectoryConfig {
    fn default() -> Self {
        Self {
            output_directory: PathBuf::from("./checkpoints"),
            is_master: true,
            name: "checkpoint".to_string(),
            keep_last: 0,
            publish_timeout: Duration::from_secs(300),
        }
    }
}

impl AtomicDirectoryConfig {
    /// Configuration rooted at `output_directory` with defaults elsewhere
    pub fn new<P: Into<PathBuf>>(output_directory: P) -> Self {
        Self {
            output_directory: output_directory.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_master(mut self, is_master: bool) -> Self {
        self.is_master = is_master;
        self
    }

    pub fn with_keep_last(mut self, keep_last: i64) -> Self {
        self.keep_last = keep_last;
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Retention policy derived from `keep_last`
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::from_keep_last(self.keep_last)
    }

    /// Check the saver name and timeout are usable
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidConfig {
                message: "checkpoint name must not be empty".to_string(),
            });
        }
        if self.name.contains(std::path::MAIN_SEPARATOR) || self.name.starts_with('.') {
            return Err(Error::InvalidConfig {
                message: format!("checkpoint name '{}' must be a plain file name", self.name),
            });
        }
        if self.publish_timeout.is_zero() {
            return Err(Error::InvalidConfig {
                message: "publish_timeout must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Sampler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Seed combined with the epoch for shuffling
    pub seed: i64,

    /// Shuffle per epoch instead of identity order
    pub shuffle: bool,

    /// Give every rank the same shard length by skipping the
    /// `dataset_len % world_size` tail of each epoch's permutation
    pub drop_last: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            shuffle: true,
            drop_last: false,
        }
    }
}

/// Collective communication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectiveConfig {
    /// Per-operation timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Poll interval for filesystem-backed groups
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for CollectiveConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl CollectiveConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() || self.timeout < self.poll_interval {
            return Err(Error::InvalidConfig {
                message: format!(
                    "collective timeout {:?} must exceed a non-zero poll interval {:?}",
                    self.timeout, self.poll_interval
                ),
            });
        }
        Ok(())
    }
}

/// Duration serialization helper for human-readable formats
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
