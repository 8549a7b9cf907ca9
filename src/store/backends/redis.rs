//! Redis state store
//!
//! Each partition's checkpoint is a single string value under
//! `<group-id>:<topic>:<partition>` holding the `{"offset", "state"}` document.
//! Concurrency is bounded by the pool size plus a queue of waiting operations;
//! anything beyond that fails fast instead of piling up.

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::config::RedisStoreConfig;
use crate::partition::PartitionKey;
use crate::store::{
    error::{StoreError, StoreResult},
    traits::StateStore,
    types::{StoreHealth, StoreRecord},
};

/// Redis state store backed by a deadpool connection pool
pub struct RedisStateStore {
    pool: Arc<Pool>,
    group_id: String,
    admission: Arc<Semaphore>,
}

impl RedisStateStore {
    /// Create the pool and verify connectivity
    pub async fn new(
        config: &RedisStoreConfig,
        group_id: &str,
        timeout: Duration,
    ) -> StoreResult<Self> {
        info!("Initializing Redis state store");

        let mut pool_config = Config::from_url(&config.connection_string);
        let mut pool = PoolConfig::new(config.max_pool_size);
        pool.timeouts.wait = Some(timeout);
        pool.timeouts.create = Some(timeout);
        pool.timeouts.recycle = Some(timeout);
        pool_config.pool = Some(pool);

        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::configuration(format!("Failed to create Redis pool: {}", e)))?;

        let store = Self {
            pool: Arc::new(pool),
            group_id: group_id.to_string(),
            admission: Arc::new(Semaphore::new(
                config.max_pool_size + config.max_waiting_handlers,
            )),
        };

        let health = store.health_check().await?;
        if !health.healthy {
            return Err(StoreError::connection(format!(
                "Failed to connect to Redis: {}",
                health.details.unwrap_or_default()
            )));
        }

        Ok(store)
    }

    /// Reserve a slot and check out a pooled connection
    async fn connection(&self) -> StoreResult<(OwnedSemaphorePermit, Connection)> {
        let permit = self.admission.clone().try_acquire_owned().map_err(|_| {
            StoreError::unavailable("too many pending Redis operations")
        })?;
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::connection(e.to_string()))?;
        Ok((permit, conn))
    }
}

fn command_error(e: redis::RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() {
        StoreError::connection(e.to_string())
    } else {
        StoreError::unavailable(e.to_string())
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    fn backend_type(&self) -> &'static str {
        "redis"
    }

    async fn fetch(&self, key: &PartitionKey) -> StoreResult<Option<StoreRecord>> {
        let (_permit, mut conn) = self.connection().await?;
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key.store_key(&self.group_id))
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        value
            .map(|document| StoreRecord::from_document(&document))
            .transpose()
    }

    async fn persist(&self, key: &PartitionKey, record: &StoreRecord) -> StoreResult<()> {
        let document = record.to_document()?;
        let (_permit, mut conn) = self.connection().await?;

        debug!("Persisting checkpoint for {} at offset {}", key, record.offset);
        let _: () = redis::cmd("SET")
            .arg(key.store_key(&self.group_id))
            .arg(document)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(())
    }

    async fn fetch_many(
        &self,
        keys: &[PartitionKey],
    ) -> StoreResult<HashMap<PartitionKey, StoreRecord>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let (_permit, mut conn) = self.connection().await?;
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(key.store_key(&self.group_id));
        }
        let values: Vec<Option<Vec<u8>>> =
            cmd.query_async(&mut conn).await.map_err(command_error)?;

        let mut records = HashMap::with_capacity(keys.len());
        for (key, value) in keys.iter().zip(values) {
            if let Some(document) = value {
                records.insert(key.clone(), StoreRecord::from_document(&document)?);
            }
        }
        Ok(records)
    }

    async fn persist_many(&self, records: &[(PartitionKey, StoreRecord)]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        let mut mset = redis::cmd("MSET");
        for (key, record) in records {
            mset.arg(key.store_key(&self.group_id))
                .arg(record.to_document()?);
        }
        pipe.add_command(mset).ignore();

        let (_permit, mut conn) = self.connection().await?;
        let _: () = pipe.query_async(&mut conn).await.map_err(command_error)?;
        debug!("Persisted {} checkpoints in one transaction", records.len());
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<StoreHealth> {
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Redis health check failed: {}", e);
                return Ok(StoreHealth::unhealthy(self.backend_type(), e.to_string()));
            }
        };

        let pong: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        match pong {
            Ok(_) => Ok(StoreHealth::healthy(self.backend_type())),
            Err(e) => Ok(StoreHealth::unhealthy(self.backend_type(), e.to_string())),
        }
    }

    async fn close(&self) -> StoreResult<()> {
        self.admission.close();
        self.pool.close();
        info!("Redis state store closed");
        Ok(())
    }
}
