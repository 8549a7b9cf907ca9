//! Store registry keyed by the `state-store` option

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::backends::{FileStateStore, MemoryStateStore};
use super::error::{StoreError, StoreResult};
use super::traits::StateStore;
use crate::config::CheckpointConfig;

/// Future returned by a store factory
pub type StoreFuture = BoxFuture<'static, StoreResult<Arc<dyn StateStore>>>;

/// Factory function type for creating stores from configuration
pub type StoreFactory = Arc<dyn Fn(&CheckpointConfig) -> StoreFuture + Send + Sync>;

/// Registry of store implementations, selected by name at engine startup
#[derive(Clone, Default)]
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `memory`, `file` and `redis` stores
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register(
            "memory",
            Arc::new(|config: &CheckpointConfig| -> StoreFuture {
                let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new(&config.group_id));
                futures::future::ready(Ok(store)).boxed()
            }),
        );

        registry.register(
            "file",
            Arc::new(|config: &CheckpointConfig| -> StoreFuture {
                let file_config = config.file.clone();
                let group_id = config.group_id.clone();
                async move {
                    let store = FileStateStore::new(&file_config, &group_id).await?;
                    Ok(Arc::new(store) as Arc<dyn StateStore>)
                }
                .boxed()
            }),
        );

        registry.register("redis", redis_factory());
        registry
    }

    /// Register a factory under `name`, replacing any previous one
    pub fn register(&mut self, name: impl Into<String>, factory: StoreFactory) -> &mut Self {
        self.factories.insert(name.into(), factory);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered store names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Create the store named by `config.state_store`
    pub async fn create(&self, config: &CheckpointConfig) -> StoreResult<Arc<dyn StateStore>> {
        let factory = self.factories.get(&config.state_store).ok_or_else(|| {
            StoreError::configuration(format!(
                "Unknown state-store '{}' (registered: {})",
                config.state_store,
                self.names().join(", ")
            ))
        })?;

        debug!("Creating '{}' state store", config.state_store);
        factory(config).await
    }
}

#[cfg(feature = "redis")]
fn redis_factory() -> StoreFactory {
    use super::backends::RedisStateStore;

    Arc::new(|config: &CheckpointConfig| -> StoreFuture {
        let redis_config = config.redis.clone();
        let group_id = config.group_id.clone();
        let timeout = config.store_timeout;
        async move {
            let store = RedisStateStore::new(&redis_config, &group_id, timeout).await?;
            Ok(Arc::new(store) as Arc<dyn StateStore>)
        }
        .boxed()
    })
}

#[cfg(not(feature = "redis"))]
fn redis_factory() -> StoreFactory {
    Arc::new(|_: &CheckpointConfig| -> StoreFuture {
        futures::future::ready(Err(StoreError::configuration(
            "Redis backend not enabled. Enable with --features redis",
        )))
        .boxed()
    })
}
