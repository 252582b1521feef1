//! Atomically updated "latest" pointer
//!
//! On unix the pointer is a relative symlink, replaced by creating the new
//! link under a temporary name and renaming it over the old one. Elsewhere
//! the pointer is a small file holding the target name, replaced through
//! [`AtomicWriter`]. Readers accept either form.

use std::io;
use std::path::Path;

use runtime_core::{Error, Result};
use tokio::fs;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::writer::sync_directory;
#[cfg(not(unix))]
use crate::AtomicWriter;

/// Point `pointer` at `target_name` (a sibling entry name).
///
/// The previous target stays reachable through the pointer until the rename
/// lands; on failure it is still the one readers see.
#[instrument(skip_all, fields(pointer = %pointer.display(), target_name = %target_name))]
pub async fn replace_pointer(pointer: &Path, target_name: &str) -> Result<()> {
    let rename_failed = |source: io::Error| Error::RenamePointerFailed {
        pointer: pointer.display().to_string(),
        target: target_name.to_string(),
        source,
    };

    let temp = pointer.with_file_name(format!(
        ".{}.{}.tmp",
        pointer.file_name().unwrap_or_default().to_string_lossy(),
        Uuid::new_v4()
    ));

    #[cfg(unix)]
    {
        fs::symlink(target_name, &temp).await.map_err(rename_failed)?;
        if let Err(e) = fs::rename(&temp, pointer).await {
            let _ = fs::remove_file(&temp).await;
            return Err(rename_failed(e));
        }
    }

    #[cfg(not(unix))]
    {
        let _ = temp;
        AtomicWriter::new()
            .write(pointer, target_name.as_bytes().to_vec())
            .await
            .map_err(|e| rename_failed(io::Error::new(io::ErrorKind::Other, e.to_string())))?;
    }

    if let Some(parent) = pointer.parent() {
        sync_directory(parent).await;
    }

    debug!("Pointer updated");
    Ok(())
}

/// Name the pointer currently targets, or `None` if there is no pointer
pub async fn read_pointer(pointer: &Path) -> Result<Option<String>> {
    let meta = match fs::symlink_metadata(pointer).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    };

    let target = if meta.file_type().is_symlink() {
        fs::read_link(pointer).await?
            .to_string_lossy()
            .to_string()
    } else {
        fs::read_to_string(pointer).await?.trim().to_string()
    };

    Ok(Some(target))
}
