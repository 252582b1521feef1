//! Atomic single-artifact writer
//!
//! Content goes to a hidden temporary file next to the target, is synced to
//! disk, and is then renamed over the target. The rename is the only step
//! that changes what readers of the target see.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use runtime_core::error::BoxError;
use runtime_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::ArtifactFormat;

/// Writes artifacts with all-or-nothing replacement semantics
#[derive(Debug, Clone, Default)]
pub struct AtomicWriter {
    /// Where temporary files are created; the target's directory if unset
    staging_dir: Option<PathBuf>,
}

impl AtomicWriter {
    /// Writer staging temporaries next to each target
    pub fn new() -> Self {
        Self::default()
    }

    /// Writer staging temporaries in `dir`.
    ///
    /// Writes are rejected with [`Error::CrossDevice`] when `dir` is not on
    /// the same device as the target, since rename is only atomic within
    /// one filesystem.
    pub fn with_staging_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            staging_dir: Some(dir.as_ref().to_path_buf()),
        }
    }

    /// Atomically replace `path` with `data`, returning the bytes written
    #[instrument(skip(self, path, data), fields(artifact = %path.as_ref().display()))]
    pub async fn write(&self, path: impl AsRef<Path>, data: impl Into<Bytes>) -> Result<u64> {
        self.stage(path, data).await?.commit().await
    }

    /// Atomically replace `path` with whatever `producer` emits.
    ///
    /// A producer error fails the write before anything touches the disk.
    pub async fn write_with<F, E>(&self, path: impl AsRef<Path>, producer: F) -> Result<u64>
    where
        F: FnOnce(&mut Vec<u8>) -> std::result::Result<(), E>,
        E: Into<BoxError>,
    {
        let path = path.as_ref();
        let mut buf = Vec::new();
        producer(&mut buf).map_err(|e| Error::write_failed(path, e))?;
        self.write(path, buf).await
    }

    /// Serialize `value` and atomically write it to `path`
    pub async fn write_encoded<T: Serialize>(
        &self,
        path: impl AsRef<Path>,
        format: ArtifactFormat,
        value: &T,
    ) -> Result<u64> {
        self.write_with(path, |buf| format.encode_into(buf, value))
            .await
    }

    /// Read and deserialize an artifact written by [`write_encoded`](Self::write_encoded)
    pub async fn read_encoded<T: DeserializeOwned>(
        path: impl AsRef<Path>,
        format: ArtifactFormat,
    ) -> Result<T> {
        let data = fs::read(path.as_ref()).await?;
        format.decode(&data)
    }

    /// Write `data` to a synced temporary file without publishing it.
    ///
    /// The target is untouched until [`PendingWrite::commit`]. Dropping the
    /// returned value without committing removes the temporary file.
    pub async fn stage(&self, path: impl AsRef<Path>, data: impl Into<Bytes>) -> Result<PendingWrite> {
        let target = path.as_ref().to_path_buf();
        let data: Bytes = data.into();

        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| Error::write_failed(&target, e))?;

        let staging = self.staging_dir.clone().unwrap_or_else(|| parent.clone());
        if self.staging_dir.is_some() {
            fs::create_dir_all(&staging)
                .await
                .map_err(|e| Error::write_failed(&target, e))?;
            ensure_same_device(&staging, &parent).await?;
        }

        let temp_path = staging.join(temp_name(&target));
        debug!(artifact = ?target, ?temp_path, size = data.len(), "Staging artifact");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::write_failed(&target, e))?;

        // From here on, an early return drops `pending` and removes the temp file.
        let pending = PendingWrite {
            temp_path,
            target,
            size: data.len() as u64,
            committed: false,
        };

        file.write_all(&data)
            .await
            .map_err(|e| Error::write_failed(&pending.target, e))?;
        file.sync_all()
            .await
            .map_err(|e| Error::write_failed(&pending.target, e))?;
        drop(file);

        Ok(pending)
    }
}

/// A fully synced temporary file waiting to be renamed onto its target
#[derive(Debug)]
pub struct PendingWrite {
    temp_path: PathBuf,
    target: PathBuf,
    size: u64,
    committed: bool,
}

impl PendingWrite {
    /// Temporary file holding the staged content
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Final destination
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Rename the staged file onto the target
    pub async fn commit(mut self) -> Result<u64> {
        fs::rename(&self.temp_path, &self.target)
            .await
            .map_err(|e| Error::write_failed(&self.target, e))?;
        self.committed = true;

        if let Some(parent) = self.target.parent() {
            sync_directory(parent).await;
        }

        debug!(artifact = ?self.target, size = self.size, "Artifact committed");
        Ok(self.size)
    }

    /// Discard the staged content, leaving the target untouched
    pub async fn abort(mut self) -> Result<()> {
        self.committed = true;
        match fs::remove_file(&self.temp_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

impl Drop for PendingWrite {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = std::fs::remove_file(&self.temp_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = ?self.temp_path, error = %e, "Failed to remove staged file");
                }
            }
        }
    }
}

/// Best-effort fsync of a directory so renames inside it are durable
pub async fn sync_directory(dir: &Path) {
    #[cfg(unix)]
    {
        match fs::File::open(dir).await {
            Ok(handle) => {
                if let Err(e) = handle.sync_all().await {
                    debug!(?dir, error = %e, "Directory fsync failed");
                }
            }
            Err(e) => debug!(?dir, error = %e, "Could not open directory for fsync"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}

/// Unique hidden temporary name derived from the target's file name
fn temp_name(target: &Path) -> String {
    format!(
        ".{}.{}.tmp",
        target.file_name().unwrap_or_default().to_string_lossy(),
        Uuid::new_v4()
    )
}

#[cfg(unix)]
async fn ensure_same_device(staging: &Path, target_dir: &Path) -> Result<()> {
    use std::os::unix::fs::MetadataExt;

    let staging_dev = fs::metadata(staging).await?.dev();
    let target_dev = fs::metadata(target_dir).await?.dev();
    if staging_dev != target_dev {
        return Err(Error::CrossDevice {
            staging: staging.display().to_string(),
            target: target_dir.display().to_string(),
        });
    }
    Ok(())
}

#[cfg(not(unix))]
async fn ensure_same_device(_staging: &Path, _target_dir: &Path) -> Result<()> {
    Ok(())
}
