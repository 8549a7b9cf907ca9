//! File-based state store
//!
//! One JSON document per partition at
//! `<state-dir>/<group-id>/<topic>/<partition>.json`. Writes go to a temporary
//! file in the same directory followed by a rename, so a reader sees either the
//! previous document or the new one.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::FileStoreConfig;
use crate::partition::PartitionKey;
use crate::store::{
    error::{StoreError, StoreResult},
    traits::StateStore,
    types::{StoreHealth, StoreRecord},
};

/// File-based state store
pub struct FileStateStore {
    base_dir: PathBuf,
}

impl FileStateStore {
    /// Create a store rooted at the configured state directory
    pub async fn new(config: &FileStoreConfig, group_id: &str) -> StoreResult<Self> {
        if group_id.contains(['/', '\\']) || group_id == ".." {
            return Err(StoreError::configuration(format!(
                "group id '{}' cannot be used as a directory name",
                group_id
            )));
        }

        let base_dir = config.state_dir.join(group_id);
        fs::create_dir_all(&base_dir).await?;
        info!("File state store at {}", base_dir.display());

        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get path for a partition's document
    fn document_path(&self, key: &PartitionKey) -> StoreResult<PathBuf> {
        if key.topic.is_empty() || key.topic.contains(['/', '\\']) || key.topic == ".." {
            return Err(StoreError::configuration(format!(
                "topic '{}' cannot be used as a directory name",
                key.topic
            )));
        }
        Ok(self
            .base_dir
            .join(&key.topic)
            .join(format!("{}.json", key.partition)))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    fn backend_type(&self) -> &'static str {
        "file"
    }

    async fn fetch(&self, key: &PartitionKey) -> StoreResult<Option<StoreRecord>> {
        let path = self.document_path(key)?;
        match fs::read(&path).await {
            Ok(document) => StoreRecord::from_document(&document).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn persist(&self, key: &PartitionKey, record: &StoreRecord) -> StoreResult<()> {
        let path = self.document_path(key)?;
        let document = record.to_document()?;

        let dir = path
            .parent()
            .ok_or_else(|| StoreError::configuration("document path has no parent"))?;
        fs::create_dir_all(dir).await?;

        let tmp = dir.join(format!(".{}.{}.tmp", key.partition, Uuid::new_v4()));
        fs::write(&tmp, &document).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StoreError::Io(e));
        }

        debug!(
            "Persisted checkpoint for {} at offset {} to {}",
            key,
            record.offset,
            path.display()
        );
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<StoreHealth> {
        match fs::metadata(&self.base_dir).await {
            Ok(meta) if meta.is_dir() => Ok(StoreHealth::healthy(self.backend_type())),
            Ok(_) => Ok(StoreHealth::unhealthy(
                self.backend_type(),
                format!("{} is not a directory", self.base_dir.display()),
            )),
            Err(e) => Ok(StoreHealth::unhealthy(self.backend_type(), e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_store(dir: &TempDir) -> FileStateStore {
        let config = FileStoreConfig {
            state_dir: dir.path().to_path_buf(),
        };
        FileStateStore::new(&config, "group").await.unwrap()
    }

    #[tokio::test]
    async fn test_persist_and_fetch() {
        let dir = TempDir::new().unwrap();
        let store = create_store(&dir).await;
        let key = PartitionKey::new("events", 0);

        assert_eq!(store.fetch(&key).await.unwrap(), None);

        let record = StoreRecord::new(100, b"4950".to_vec());
        store.persist(&key, &record).await.unwrap();
        assert_eq!(store.fetch(&key).await.unwrap(), Some(record));

        let on_disk = std::fs::read(dir.path().join("group/events/0.json")).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&on_disk).unwrap();
        assert_eq!(value, serde_json::json!({"offset": 100, "state": 4950}));
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = create_store(&dir).await;
        let key = PartitionKey::new("events", 3);

        for offset in 1..=5 {
            store
                .persist(&key, &StoreRecord::new(offset, offset.to_string().into_bytes()))
                .await
                .unwrap();
        }

        assert_eq!(store.fetch(&key).await.unwrap().unwrap().offset, 5);
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("group/events"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries, vec!["3.json".to_string()]);
    }

    #[tokio::test]
    async fn test_corrupt_document_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = create_store(&dir).await;
        let key = PartitionKey::new("events", 1);

        std::fs::create_dir_all(dir.path().join("group/events")).unwrap();
        std::fs::write(dir.path().join("group/events/1.json"), b"not json").unwrap();

        assert!(matches!(
            store.fetch(&key).await,
            Err(StoreError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let dir = TempDir::new().unwrap();
        let config = FileStoreConfig {
            state_dir: dir.path().to_path_buf(),
        };
        assert!(FileStateStore::new(&config, "../escape").await.is_err());

        let store = create_store(&dir).await;
        let key = PartitionKey::new("a/b", 0);
        assert!(store.fetch(&key).await.is_err());
    }

    #[tokio::test]
    async fn test_health_check() {
        let dir = TempDir::new().unwrap();
        let store = create_store(&dir).await;
        let health = store.health_check().await.unwrap();
        assert!(health.healthy);
        assert_eq!(health.backend_type, "file");
    }
}
