//! Core trait definition for checkpoint state stores

use async_trait::async_trait;
use std::collections::HashMap;

use super::error::StoreResult;
use super::types::{StoreHealth, StoreRecord};
use crate::partition::PartitionKey;

/// Durable key/value backend holding one checkpoint per partition
///
/// Absence of a record (`Ok(None)`) means "no prior checkpoint" and is distinct
/// from a failure. Connectivity problems surface as retryable errors.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Short backend name, as used in the `state-store` option
    fn backend_type(&self) -> &'static str;

    /// Fetch the checkpoint for one partition
    async fn fetch(&self, key: &PartitionKey) -> StoreResult<Option<StoreRecord>>;

    /// Persist offset and state for one partition as a single unit
    async fn persist(&self, key: &PartitionKey, record: &StoreRecord) -> StoreResult<()>;

    /// Fetch checkpoints for several partitions; absent partitions are omitted
    async fn fetch_many(
        &self,
        keys: &[PartitionKey],
    ) -> StoreResult<HashMap<PartitionKey, StoreRecord>> {
        let mut records = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = self.fetch(key).await? {
                records.insert(key.clone(), record);
            }
        }
        Ok(records)
    }

    /// Persist several checkpoints; stops at the first failure
    async fn persist_many(&self, records: &[(PartitionKey, StoreRecord)]) -> StoreResult<()> {
        for (key, record) in records {
            self.persist(key, record).await?;
        }
        Ok(())
    }

    /// Check the health of the backend
    async fn health_check(&self) -> StoreResult<StoreHealth>;

    /// Release backend resources
    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}
