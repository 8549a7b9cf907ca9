//! In-memory state store
//!
//! Keeps the persisted documents in a map so the full document path is
//! exercised. Outages can be simulated with [`MemoryStateStore::set_available`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::partition::PartitionKey;
use crate::store::{
    error::{StoreError, StoreResult},
    traits::StateStore,
    types::{StoreHealth, StoreRecord},
};

/// In-memory state store, cheap to clone; clones share the same data
#[derive(Clone)]
pub struct MemoryStateStore {
    group_id: String,
    documents: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    available: Arc<AtomicBool>,
    persist_count: Arc<AtomicU64>,
}

impl MemoryStateStore {
    /// Create an empty store for a consumer group
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            documents: Arc::new(RwLock::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
            persist_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Toggle a simulated outage; unavailable stores fail every call
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Number of successful persist calls
    pub fn persist_count(&self) -> u64 {
        self.persist_count.load(Ordering::Acquire)
    }

    /// Write a raw document, bypassing availability
    pub async fn insert_raw(&self, key: &PartitionKey, document: Vec<u8>) {
        self.documents
            .write()
            .await
            .insert(key.store_key(&self.group_id), document);
    }

    /// Read a raw document, bypassing availability
    pub async fn get_raw(&self, key: &PartitionKey) -> Option<Vec<u8>> {
        self.documents
            .read()
            .await
            .get(&key.store_key(&self.group_id))
            .cloned()
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::unavailable("memory store is offline"))
        }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    async fn fetch(&self, key: &PartitionKey) -> StoreResult<Option<StoreRecord>> {
        self.ensure_available()?;
        let documents = self.documents.read().await;
        documents
            .get(&key.store_key(&self.group_id))
            .map(|document| StoreRecord::from_document(document))
            .transpose()
    }

    async fn persist(&self, key: &PartitionKey, record: &StoreRecord) -> StoreResult<()> {
        self.ensure_available()?;
        let document = record.to_document()?;
        debug!("Persisting checkpoint for {} at offset {}", key, record.offset);
        self.documents
            .write()
            .await
            .insert(key.store_key(&self.group_id), document);
        self.persist_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<StoreHealth> {
        if self.is_available() {
            Ok(StoreHealth::healthy(self.backend_type()))
        } else {
            Ok(StoreHealth::unhealthy(self.backend_type(), "offline"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_persist_and_fetch() {
        let store = MemoryStateStore::new("group");
        let key = PartitionKey::new("events", 0);

        assert_eq!(store.fetch(&key).await.unwrap(), None);

        let record = StoreRecord::new(100, b"4950".to_vec());
        store.persist(&key, &record).await.unwrap();

        assert_eq!(store.fetch(&key).await.unwrap(), Some(record));
        assert_eq!(store.persist_count(), 1);
        assert_eq!(
            store.get_raw(&key).await.unwrap(),
            br#"{"offset":100,"state":4950}"#.to_vec()
        );
    }

    #[test]
    fn test_clones_share_documents() {
        let store = MemoryStateStore::new("group");
        let clone = store.clone();
        let key = PartitionKey::new("events", 3);

        tokio_test::assert_ok!(tokio_test::block_on(
            clone.persist(&key, &StoreRecord::new(1, b"null".to_vec()))
        ));
        let fetched = tokio_test::block_on(store.fetch(&key));
        assert_eq!(tokio_test::assert_ok!(fetched).map(|r| r.offset), Some(1));
        assert_eq!(store.persist_count(), 1);
    }

    #[tokio::test]
    async fn test_outage_fails_calls_but_keeps_data() {
        let store = MemoryStateStore::new("group");
        let key = PartitionKey::new("events", 1);
        store
            .persist(&key, &StoreRecord::new(5, b"10".to_vec()))
            .await
            .unwrap();

        store.set_available(false);
        let err = store.fetch(&key).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store
            .persist(&key, &StoreRecord::new(6, b"11".to_vec()))
            .await
            .is_err());
        assert!(!store.health_check().await.unwrap().healthy);

        store.set_available(true);
        assert_eq!(store.fetch(&key).await.unwrap().unwrap().offset, 5);
    }

    #[tokio::test]
    async fn test_corrupt_document_is_not_absent() {
        let store = MemoryStateStore::new("group");
        let key = PartitionKey::new("events", 2);
        store.insert_raw(&key, b"{broken".to_vec()).await;

        let err = store.fetch(&key).await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_groups_are_isolated_and_clones_share_data() {
        let store_a = MemoryStateStore::new("a");
        let store_b = MemoryStateStore::new("b");
        let key = PartitionKey::new("events", 0);

        store_a
            .persist(&key, &StoreRecord::new(1, b"1".to_vec()))
            .await
            .unwrap();
        assert_eq!(store_b.fetch(&key).await.unwrap(), None);

        let clone = store_a.clone();
        assert!(clone.fetch(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fetch_many_omits_absent() {
        let store = MemoryStateStore::new("group");
        let present = PartitionKey::new("events", 0);
        let absent = PartitionKey::new("events", 1);
        store
            .persist(&present, &StoreRecord::new(3, b"3".to_vec()))
            .await
            .unwrap();

        let records = store
            .fetch_many(&[present.clone(), absent.clone()])
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert!(records.contains_key(&present));
        assert!(!records.contains_key(&absent));
    }
}
