//! Integration tests across crates
//!
//! Tests configuration loading, the shared-filesystem process group driving
//! checkpoint publishes, and concurrent readers of atomically replaced
//! artifacts.

use anyhow::Result;
use checkpoint::AtomicDirectory;
use collective::{readiness_check, FileStoreGroup, ProcessGroup};
use data_shard::ResumableShardedSampler;
use runtime_core::{CollectiveConfig, Error, RuntimeConfig, SamplerState, SaveStrategy};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storage::{ArtifactFormat, AtomicWriter};
use tempfile::TempDir;

fn fast_collective() -> CollectiveConfig {
    CollectiveConfig {
        timeout: Duration::from_secs(10),
        poll_interval: Duration::from_millis(5),
    }
}

#[tokio::test]
async fn test_config_file_drives_checkpointing() -> Result<()> {
    let tmp = TempDir::new()?;
    let config_path = tmp.path().join("runtime.json");
    let output = tmp.path().join("out");
    std::fs::write(
        &config_path,
        serde_json::json!({
            "checkpoint": {
                "output_directory": output,
                "name": "model",
                "keep_last": 1,
                "publish_timeout": 2000
            },
            "sampler": { "seed": 99, "shuffle": false }
        })
        .to_string(),
    )?;

    let config = RuntimeConfig::from_json_file(&config_path)?;
    assert_eq!(config.checkpoint.publish_timeout, Duration::from_secs(2));

    let group = FileStoreGroup::new(
        tmp.path().join("rendezvous"),
        "config-run",
        0,
        1,
        config.collective.clone(),
    )
    .await?;
    let mut dir = AtomicDirectory::open(config.checkpoint.clone(), Arc::new(group)).await?;
    let mut sampler = ResumableShardedSampler::from_config(&config.sampler, 20, 0, 1)?;

    for _ in 0..3 {
        sampler.advance(5)?;
        let generation = dir.prepare_next_generation().await?;
        AtomicWriter::new()
            .write_encoded(
                generation.path().join("sampler.json"),
                ArtifactFormat::Json,
                &sampler.state_dict(),
            )
            .await?;
        dir.publish(&generation, false, SaveStrategy::Any).await?;
    }

    let latest = AtomicDirectory::resolve_latest(&output, "model")
        .await?
        .expect("published");
    assert_eq!(latest, output.join("model-0000000003"));
    let state: SamplerState =
        AtomicWriter::read_encoded(latest.join("sampler.json"), ArtifactFormat::Json).await?;
    assert_eq!(
        state,
        SamplerState {
            epoch: 0,
            progress: 15,
            seed: 99,
            shuffle: false
        }
    );

    let remaining: Vec<u64> = dir.generations().await?.iter().map(|g| g.sequence).collect();
    assert_eq!(remaining, vec![2, 3]);
    Ok(())
}

#[tokio::test]
async fn test_file_store_group_with_disjoint_roots() -> Result<()> {
    let tmp = TempDir::new()?;
    let rendezvous = tmp.path().join("rendezvous");
    let world_size = 2;

    let mut tasks = Vec::new();
    for rank in 0..world_size {
        let rendezvous = rendezvous.clone();
        let root: PathBuf = tmp.path().join(format!("node-{}", rank));
        tasks.push(tokio::spawn(async move {
            let group =
                FileStoreGroup::new(&rendezvous, "job-7", rank, world_size, fast_collective())
                    .await?;
            readiness_check(&group).await?;

            // Every worker owns its root, so every worker writes its own pointer
            let config = runtime_core::AtomicDirectoryConfig::new(&root).with_master(true);
            let mut dir = AtomicDirectory::open(config, Arc::new(group)).await?;

            let mut decisions = Vec::new();
            for cycle in 0..3u32 {
                let generation = dir.prepare_next_generation().await?;
                AtomicWriter::new()
                    .write(generation.path().join("shard.bin"), vec![rank as u8; 128])
                    .await?;
                // Only rank 1 asks for cycle 1 to be kept; "all" rejects it
                let force = cycle == 1 && rank == 1;
                decisions.push(dir.publish(&generation, force, SaveStrategy::All).await?);
            }
            Ok::<_, anyhow::Error>((root, decisions))
        }));
    }

    for task in tasks {
        let (root, decisions) = task.await??;
        assert_eq!(decisions, vec![false, false, false]);

        let latest = AtomicDirectory::resolve_latest(&root, "checkpoint")
            .await?
            .expect("published");
        assert_eq!(latest, root.join("checkpoint-0000000003"));
        assert!(!root.join("checkpoint-0000000001").exists());
        assert!(!root.join("checkpoint-0000000002").exists());
    }
    Ok(())
}

#[tokio::test]
async fn test_missing_rank_times_out_publish() -> Result<()> {
    let tmp = TempDir::new()?;
    let config = CollectiveConfig {
        timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(10),
    };

    // Rank 1 of 2 never shows up, so even opening cannot agree
    let group = FileStoreGroup::new(tmp.path().join("rv"), "lonely", 0, 2, config).await?;
    assert_eq!(group.world_size(), 2);
    let result = AtomicDirectory::open(
        runtime_core::AtomicDirectoryConfig::new(tmp.path().join("ckpt")),
        Arc::new(group),
    )
    .await;
    assert!(matches!(result, Err(Error::CollectiveTimeout { .. })));
    Ok(())
}

#[tokio::test]
async fn test_stalled_publish_is_fatal_timeout() -> Result<()> {
    let tmp = TempDir::new()?;
    let rendezvous = tmp.path().join("rv");
    let root = tmp.path().join("ckpt");
    let config = CollectiveConfig {
        timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(10),
    };

    // Both ranks open, only rank 0 ever publishes. The group gives up long
    // before the publish deadline would.
    let peer = {
        let (rendezvous, root, config) = (rendezvous.clone(), root.clone(), config.clone());
        tokio::spawn(async move {
            let group = FileStoreGroup::new(&rendezvous, "stall", 1, 2, config).await?;
            let dir_config = runtime_core::AtomicDirectoryConfig::new(&root).with_master(false);
            AtomicDirectory::open(dir_config, Arc::new(group)).await?;
            Ok::<_, anyhow::Error>(())
        })
    };
    let group = FileStoreGroup::new(&rendezvous, "stall", 0, 2, config).await?;
    let dir_config = runtime_core::AtomicDirectoryConfig::new(&root)
        .with_publish_timeout(Duration::from_secs(5));
    let mut dir = AtomicDirectory::open(dir_config, Arc::new(group)).await?;
    peer.await??;

    let generation = dir.prepare_next_generation().await?;
    let err = dir
        .publish(&generation, false, SaveStrategy::Any)
        .await
        .expect_err("peer never publishes");
    assert!(matches!(err, Error::PublishTimeout { .. }), "{:?}", err);
    assert!(err.is_fatal());
    assert!(!err.is_retryable());
    assert_eq!(dir.latest().await?, None);
    Ok(())
}

/// A reader polling while a writer keeps replacing an artifact only ever
/// sees complete contents.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_readers_never_see_partial_artifacts() -> Result<()> {
    let tmp = TempDir::new()?;
    let path = tmp.path().join("state.bin");
    AtomicWriter::new().write(&path, vec![0u8; 1000]).await?;

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let path = path.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let mut reads = 0u32;
            loop {
                let finished = done.load(Ordering::SeqCst);
                let data = tokio::fs::read(&path).await?;
                let fill = data[0];
                assert_eq!(data.len(), 1000 + fill as usize * 1000, "torn length");
                assert!(data.iter().all(|&b| b == fill), "mixed contents");
                reads += 1;
                if finished {
                    break;
                }
            }
            Ok::<_, anyhow::Error>(reads)
        })
    };

    let writer = AtomicWriter::new();
    for round in 1..=50u8 {
        let fill = round % 8;
        writer
            .write(&path, vec![fill; 1000 + fill as usize * 1000])
            .await?;
    }
    done.store(true, Ordering::SeqCst);

    let reads = reader.await??;
    assert!(reads > 0);
    Ok(())
}
