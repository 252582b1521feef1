//! Generation directory naming and discovery

use std::path::{Path, PathBuf};

use runtime_core::{GenerationManifest, Result, SequenceNumber};
use storage::{ArtifactFormat, AtomicWriter};
use tokio::fs;

/// Width of the zero-padded sequence number in directory names
const SEQUENCE_WIDTH: usize = 10;

/// A generation directory handed out by `prepare_next_generation`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    sequence: SequenceNumber,
    path: PathBuf,
}

impl Generation {
    pub(crate) fn new(sequence: SequenceNumber, path: PathBuf) -> Self {
        Self { sequence, path }
    }

    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    /// Directory to write this generation's files into
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A generation found on disk
#[derive(Debug, Clone)]
pub struct GenerationInfo {
    pub sequence: SequenceNumber,
    pub path: PathBuf,

    /// Present once the generation has been published
    pub manifest: Option<GenerationManifest>,
}

impl GenerationInfo {
    /// Whether the generation was ever published
    pub fn is_committed(&self) -> bool {
        self.manifest.is_some()
    }

    /// Whether the generation is exempt from pruning
    pub fn is_preserved(&self) -> bool {
        self.manifest.as_ref().map(|m| m.preserved).unwrap_or(false)
    }
}

pub(crate) fn dir_name(name: &str, sequence: SequenceNumber) -> String {
    format!("{}-{:0width$}", name, sequence, width = SEQUENCE_WIDTH)
}

pub(crate) fn pointer_name(name: &str) -> String {
    format!("{}-latest", name)
}

/// Sequence number encoded in `entry`, if it names one of `name`'s generations
pub(crate) fn parse_sequence(name: &str, entry: &str) -> Option<SequenceNumber> {
    let digits = entry.strip_prefix(name)?.strip_prefix('-')?;
    if digits.len() != SEQUENCE_WIDTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

pub(crate) async fn read_manifest(dir: &Path) -> Result<Option<GenerationManifest>> {
    let path = dir.join(GenerationManifest::FILE_NAME);
    // Only a missing manifest marks an orphan; anything else must not get
    // the generation pruned
    match fs::metadata(&path).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    AtomicWriter::read_encoded(&path, ArtifactFormat::Json)
        .await
        .map(Some)
}

/// All of `name`'s generation directories under `root`, oldest first
pub(crate) async fn scan(root: &Path, name: &str) -> Result<Vec<GenerationInfo>> {
    let mut generations = Vec::new();

    let mut entries = fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let entry_name = entry.file_name().to_string_lossy().to_string();
        let Some(sequence) = parse_sequence(name, &entry_name) else {
            continue;
        };
        if !entry.file_type().await?.is_dir() {
            continue;
        }

        let path = entry.path();
        let manifest = read_manifest(&path).await?;
        generations.push(GenerationInfo {
            sequence,
            path,
            manifest,
        });
    }

    generations.sort_by_key(|g| g.sequence);
    Ok(generations)
}
