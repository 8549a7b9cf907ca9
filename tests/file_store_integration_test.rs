//! Integration tests for the file-backed checkpoint store

mod common;

use anyhow::Result;
use checkpoint_commit::{
    AckOutcome, CheckpointConfig, CheckpointEngine, CodecRegistry, StoreRegistry,
};
use common::{key, sum_records, RecordingConsumer};
use std::sync::Arc;
use tempfile::TempDir;

fn file_config(dir: &TempDir) -> CheckpointConfig {
    let mut config = CheckpointConfig::new("file-group");
    config.state_store = "file".to_string();
    config.file.state_dir = dir.path().to_path_buf();
    config
}

async fn file_engine(
    dir: &TempDir,
    consumer: Arc<RecordingConsumer>,
) -> Result<CheckpointEngine<i64>> {
    Ok(CheckpointEngine::builder(file_config(dir))
        .stores(StoreRegistry::with_defaults())
        .codecs(CodecRegistry::json())
        .consumer(consumer)
        .build()
        .await?)
}

#[tokio::test]
async fn test_state_survives_restart() -> Result<()> {
    let dir = TempDir::new()?;
    let p0 = key(0);

    let first = file_engine(&dir, RecordingConsumer::new()).await?;
    assert_eq!(first.store().backend_type(), "file");
    first.assign(&[p0.clone()]).await?;
    sum_records(&first, &p0, 0..10).await;
    let report = first.shutdown().await;
    assert_eq!(report.persisted, 1);

    let document = dir.path().join("file-group").join("numbers").join("0.json");
    let persisted: serde_json::Value = serde_json::from_slice(&std::fs::read(&document)?)?;
    assert_eq!(persisted, serde_json::json!({"offset": 10, "state": 45}));

    let consumer = RecordingConsumer::new();
    let second = file_engine(&dir, consumer.clone()).await?;
    second.assign(&[p0.clone()]).await?;
    assert_eq!(consumer.last_seek(&p0), Some(10));
    assert_eq!(second.partition_state(&p0).unwrap().value(), Some(&45));
    Ok(())
}

#[tokio::test]
async fn test_checkpoints_are_read_back_in_bulk() -> Result<()> {
    let dir = TempDir::new()?;
    let engine = file_engine(&dir, RecordingConsumer::new()).await?;
    let keys = [key(0), key(1), key(2)];
    engine.assign(&keys).await?;

    for (p, k) in keys.iter().enumerate().take(2) {
        let mut handle = engine.receive(k, 0).unwrap();
        handle.set_next(Some(p as i64 * 100));
        handle.persist_on_ack();
        engine.acknowledge(handle, AckOutcome::Ack).await;
    }

    let records = engine.store().fetch_many(&keys).await?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[&key(1)].offset, 1);
    assert_eq!(records[&key(1)].state, b"100".to_vec());
    assert!(!records.contains_key(&key(2)));
    Ok(())
}

#[tokio::test]
async fn test_unknown_store_name_fails_build() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = file_config(&dir);
    config.state_store = "cassandra".to_string();

    let result = CheckpointEngine::<i64>::builder(config)
        .codecs(CodecRegistry::json())
        .consumer(RecordingConsumer::new())
        .build()
        .await;
    assert!(result.is_err());
    Ok(())
}
