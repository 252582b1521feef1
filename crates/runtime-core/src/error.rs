//! Error types for checkpoint persistence and resumable sampling

use thiserror::Error;

/// Result type alias using the runtime Error
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed underlying cause carried by write failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    // Atomic write errors
    #[error("Atomic write to {path} failed: {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: BoxError,
    },

    #[error("Staging directory {staging} is on a different device than {target}")]
    CrossDevice { staging: String, target: String },

    // Pointer errors
    #[error("Failed to move pointer {pointer} to {target}: {source}")]
    RenamePointerFailed {
        pointer: String,
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Pointer {pointer} resolves to {actual:?}, expected {expected}")]
    PointerVerificationFailed {
        pointer: String,
        expected: String,
        actual: Option<String>,
    },

    // Publish / generation errors
    #[error("Publish timed out during {operation} after {timeout_ms}ms")]
    PublishTimeout { operation: String, timeout_ms: u64 },

    #[error("Workers disagree on generation: local {local}, group {group:?}")]
    GenerationMismatch { local: u64, group: Vec<u64> },

    #[error("Invalid directory state: {message}")]
    InvalidState { message: String },

    // Sampler errors
    #[error("Advanced too far: requested {requested}, only {remaining} left in epoch {epoch}")]
    OverAdvance {
        requested: u64,
        remaining: u64,
        epoch: u64,
    },

    #[error("Invalid topology: rank {rank}, world size {world_size}")]
    InvalidTopology { rank: u32, world_size: u32 },

    #[error("Progress {progress} exceeds shard length {shard_len}")]
    ProgressOutOfRange { progress: u64, shard_len: u64 },

    #[error("Epoch {epoch} not exhausted: {remaining} items remain")]
    EpochNotExhausted { epoch: u64, remaining: u64 },

    // Collective errors
    #[error("Collective {operation} timed out after {timeout_ms}ms")]
    CollectiveTimeout { operation: String, timeout_ms: u64 },

    #[error("Collective failed: {message}")]
    CollectiveFailed { message: String },

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Build a `WriteFailed` from any underlying cause
    pub fn write_failed(
        path: impl AsRef<std::path::Path>,
        source: impl Into<BoxError>,
    ) -> Self {
        Error::WriteFailed {
            path: path.as_ref().display().to_string(),
            source: source.into(),
        }
    }

    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::WriteFailed { .. } | Error::CollectiveTimeout { .. } | Error::Io(_)
        )
    }

    /// Returns true if this error must abort the whole job
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::PublishTimeout { .. }
                | Error::GenerationMismatch { .. }
                | Error::RenamePointerFailed { .. }
                | Error::PointerVerificationFailed { .. }
                | Error::InvalidConfig { .. }
        )
    }

    /// Returns true for sampler misuse that should fail fast
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Error::OverAdvance { .. }
                | Error::InvalidTopology { .. }
                | Error::ProgressOutOfRange { .. }
                | Error::EpochNotExhausted { .. }
                | Error::InvalidState { .. }
        )
    }

    /// Returns a retry delay hint in milliseconds, if applicable
    pub fn retry_delay_hint_ms(&self) -> Option<u64> {
        match self {
            Error::WriteFailed { .. } => Some(100),
            Error::Io(_) => Some(100),
            Error::CollectiveTimeout { .. } => Some(500),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
