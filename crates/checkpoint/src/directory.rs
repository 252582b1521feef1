//! Generation-based checkpoint directory with an atomically replaced
//! latest pointer

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use collective::{ProcessGroup, ReduceOp};
use runtime_core::{
    AtomicDirectoryConfig, Error, GenerationManifest, Result, RetentionPolicy, SaveStrategy,
    SequenceNumber,
};
use storage::{read_pointer, replace_pointer, sync_directory, ArtifactFormat, AtomicWriter};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::generation::{self, dir_name, pointer_name, Generation, GenerationInfo};
use crate::retention::plan_prune;

/// Lifecycle of the directory between publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryState {
    /// No generation handed out since open or the last publish
    Idle,

    /// A generation was prepared and awaits publish
    Preparing,

    /// The last prepared generation was published
    Published,
}

/// Checkpoint root shared by every worker of a process group.
///
/// Each save cycle is `prepare_next_generation`, writing files into the
/// returned directory, then `publish`. Readers follow `<name>-latest`, which
/// only ever names a generation every worker finished writing.
///
/// Workers either share one root (exactly one `is_master`) or own disjoint
/// roots (every worker `is_master`).
pub struct AtomicDirectory {
    config: AtomicDirectoryConfig,
    group: Arc<dyn ProcessGroup>,
    writer: AtomicWriter,

    /// Sequence number the next prepare hands out
    next_sequence: SequenceNumber,

    /// Generation awaiting publish
    prepared: Option<Generation>,

    state: DirectoryState,
}

impl AtomicDirectory {
    /// Open the directory, agreeing with the group on the next sequence
    /// number.
    ///
    /// Collective: every rank of `group` must call it.
    #[instrument(skip_all, fields(name = %config.name, rank = group.rank()))]
    pub async fn open(config: AtomicDirectoryConfig, group: Arc<dyn ProcessGroup>) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.output_directory).await?;

        let local_next = generation::scan(&config.output_directory, &config.name)
            .await?
            .last()
            .map(|g| g.sequence + 1)
            .unwrap_or(1);

        let timeout = config.publish_timeout;
        let proposals = tokio::time::timeout(timeout, group.all_gather_u64(local_next))
            .await
            .map_err(|_| Error::CollectiveTimeout {
                operation: "sequence agreement".to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })??;
        let next_sequence = proposals.into_iter().max().unwrap_or(local_next);

        info!(
            root = ?config.output_directory,
            next_sequence,
            retention = ?config.retention(),
            "Opened checkpoint directory"
        );

        Ok(Self {
            config,
            group,
            writer: AtomicWriter::new(),
            next_sequence,
            prepared: None,
            state: DirectoryState::Idle,
        })
    }

    pub fn config(&self) -> &AtomicDirectoryConfig {
        &self.config
    }

    pub fn state(&self) -> DirectoryState {
        self.state
    }

    /// Sequence number the next prepare will hand out
    pub fn next_sequence(&self) -> SequenceNumber {
        self.next_sequence
    }

    /// Path of the `<name>-latest` pointer
    pub fn pointer_path(&self) -> PathBuf {
        self.config
            .output_directory
            .join(pointer_name(&self.config.name))
    }

    /// Create the next generation directory and hand it out for writing.
    ///
    /// Local, no collective. A generation prepared but never published is
    /// abandoned and later removed as an orphan.
    pub async fn prepare_next_generation(&mut self) -> Result<Generation> {
        if let Some(abandoned) = self.prepared.take() {
            warn!(
                sequence = abandoned.sequence(),
                "Preparing a new generation before publishing the previous one"
            );
        }

        let sequence = self.next_sequence;
        let path = self
            .config
            .output_directory
            .join(dir_name(&self.config.name, sequence));
        fs::create_dir_all(&path).await?;
        self.next_sequence += 1;

        let generation = Generation::new(sequence, path);
        debug!(sequence, path = ?generation.path(), "Prepared generation");

        self.prepared = Some(generation.clone());
        self.state = DirectoryState::Preparing;
        Ok(generation)
    }

    /// Publish `generation` as the new latest checkpoint.
    ///
    /// Collective: every rank must call it with the same generation. Returns
    /// whether the group decided to preserve the generation from pruning.
    #[instrument(skip(self, generation), fields(sequence = generation.sequence(), rank = self.group.rank()))]
    pub async fn publish(
        &mut self,
        generation: &Generation,
        force_save: bool,
        strategy: SaveStrategy,
    ) -> Result<bool> {
        if self.prepared.as_ref() != Some(generation) {
            return Err(Error::InvalidState {
                message: format!(
                    "generation {} is not the one awaiting publish",
                    generation.sequence()
                ),
            });
        }
        let sequence = generation.sequence();

        let sequences = self
            .bounded("generation agreement", self.group.all_gather_u64(sequence))
            .await?;
        if sequences.iter().any(|s| *s != sequence) {
            return Err(Error::GenerationMismatch {
                local: sequence,
                group: sequences,
            });
        }

        // Every rank reaching this reduction has finished writing
        let preserve = self
            .bounded(
                "force_save reduction",
                self.group.all_reduce_bool(force_save, ReduceOp::from(strategy)),
            )
            .await?;

        let committed = if self.config.is_master {
            self.commit(generation, preserve).await
        } else {
            Ok(())
        };
        let all_committed = self
            .bounded(
                "pointer barrier",
                self.group.all_reduce_bool(committed.is_ok(), ReduceOp::All),
            )
            .await?;
        committed?;
        if !all_committed {
            return Err(Error::CollectiveFailed {
                message: format!("pointer writer failed to publish generation {}", sequence),
            });
        }

        if self.config.is_master {
            self.prune(sequence).await;
        } else {
            self.verify_pointer(generation).await?;
        }

        self.prepared = None;
        self.state = DirectoryState::Published;

        info!(preserve, strategy = %strategy, "Published generation");
        Ok(preserve)
    }

    /// Current latest generation directory, if any
    pub async fn latest(&self) -> Result<Option<PathBuf>> {
        Self::resolve_latest(&self.config.output_directory, &self.config.name).await
    }

    /// Resolve `<name>-latest` under `output_directory` without opening a
    /// directory or joining a group.
    pub async fn resolve_latest<P: AsRef<Path>>(
        output_directory: P,
        name: &str,
    ) -> Result<Option<PathBuf>> {
        let root = output_directory.as_ref();
        let target = read_pointer(&root.join(pointer_name(name))).await?;
        Ok(target.map(|t| root.join(t)))
    }

    /// Manifest of the current latest generation
    pub async fn latest_manifest(&self) -> Result<Option<GenerationManifest>> {
        match self.latest().await? {
            Some(dir) => generation::read_manifest(&dir).await,
            None => Ok(None),
        }
    }

    /// Generations currently on disk, oldest first
    pub async fn generations(&self) -> Result<Vec<GenerationInfo>> {
        generation::scan(&self.config.output_directory, &self.config.name).await
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout: Duration = self.config.publish_timeout;
        match tokio::time::timeout(timeout, fut).await {
            // The group's own deadline stalls the publish just the same
            Ok(Err(Error::CollectiveTimeout { timeout_ms, .. })) => Err(Error::PublishTimeout {
                operation: operation.to_string(),
                timeout_ms,
            }),
            Ok(result) => result,
            Err(_) => Err(Error::PublishTimeout {
                operation: operation.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Mark the generation published and retarget the pointer at it
    async fn commit(&self, generation: &Generation, preserve: bool) -> Result<()> {
        let manifest = GenerationManifest::new(
            &self.config.name,
            generation.sequence(),
            preserve,
            self.group.world_size(),
        );
        self.writer
            .write_encoded(
                generation.path().join(GenerationManifest::FILE_NAME),
                ArtifactFormat::Json,
                &manifest,
            )
            .await?;
        sync_directory(generation.path()).await;

        replace_pointer(
            &self.pointer_path(),
            &dir_name(&self.config.name, generation.sequence()),
        )
        .await
    }

    async fn verify_pointer(&self, generation: &Generation) -> Result<()> {
        let expected = dir_name(&self.config.name, generation.sequence());
        let actual = read_pointer(&self.pointer_path()).await?;
        if actual.as_deref() != Some(expected.as_str()) {
            return Err(Error::PointerVerificationFailed {
                pointer: self.pointer_path().display().to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Remove generations outside the retention window. Failures are logged
    /// and never fail the publish.
    async fn prune(&self, published: SequenceNumber) {
        let policy = self.config.retention();
        if policy == RetentionPolicy::KeepAll {
            return;
        }

        let generations = match self.generations().await {
            Ok(g) => g,
            Err(e) => {
                warn!(error = %e, "Failed to list generations for pruning");
                return;
            }
        };

        for info in plan_prune(&generations, published, policy) {
            match fs::remove_dir_all(&info.path).await {
                Ok(()) => debug!(
                    sequence = info.sequence,
                    orphan = !info.is_committed(),
                    "Pruned generation"
                ),
                Err(e) => warn!(path = ?info.path, error = %e, "Failed to prune generation"),
            }
        }
    }
}
