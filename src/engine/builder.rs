//! Builder wiring the engine's collaborators together

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::shutdown::{InFlight, ShutdownSignal};
use super::{CheckpointEngine, EngineInner, EngineState, InitialState};
use crate::cache::PartitionCache;
use crate::codec::{CodecRegistry, StateCodec};
use crate::config::CheckpointConfig;
use crate::consumer::ConsumerControl;
use crate::error::{CheckpointError, CheckpointResult};
use crate::health::{HealthSink, LivenessTracker, SharedHealth};
use crate::store::{StateStore, StoreRegistry};

/// Configures a [`CheckpointEngine`]
///
/// Only the consumer is mandatory. The store is created from
/// `config.state_store` through a [`StoreRegistry`] unless one is given
/// directly, and the codec is resolved from `config.state_type` through a
/// [`CodecRegistry`] the same way.
pub struct CheckpointEngineBuilder<T> {
    config: CheckpointConfig,
    store: Option<Arc<dyn StateStore>>,
    stores: Option<StoreRegistry>,
    codec: Option<Arc<dyn StateCodec<T>>>,
    codecs: Option<CodecRegistry<T>>,
    consumer: Option<Arc<dyn ConsumerControl>>,
    health: Option<Arc<dyn HealthSink>>,
    initial_state: Option<InitialState<T>>,
}

impl<T> CheckpointEngineBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(config: CheckpointConfig) -> Self {
        Self {
            config,
            store: None,
            stores: None,
            codec: None,
            codecs: None,
            consumer: None,
            health: None,
            initial_state: None,
        }
    }

    /// Use this store instead of creating one from the configuration
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Registry used to create the store named by `state-store`
    pub fn stores(mut self, registry: StoreRegistry) -> Self {
        self.stores = Some(registry);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn StateCodec<T>>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Registry used to resolve the codec named by `state-type`
    pub fn codecs(mut self, registry: CodecRegistry<T>) -> Self {
        self.codecs = Some(registry);
        self
    }

    pub fn consumer(mut self, consumer: Arc<dyn ConsumerControl>) -> Self {
        self.consumer = Some(consumer);
        self
    }

    /// Where liveness changes are reported; defaults to a [`SharedHealth`]
    pub fn health(mut self, sink: Arc<dyn HealthSink>) -> Self {
        self.health = Some(sink);
        self
    }

    /// State given to partitions that have no checkpoint yet; without it they
    /// start with no state
    pub fn initial_state<F>(mut self, supplier: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.initial_state = Some(Arc::new(supplier));
        self
    }

    /// Validate the configuration, create the store and resolve the codec
    ///
    /// The engine is returned without timers running; call
    /// [`CheckpointEngine::start`] once the consumer is ready.
    pub async fn build(self) -> CheckpointResult<CheckpointEngine<T>> {
        self.config.validate()?;

        let consumer = self
            .consumer
            .ok_or_else(|| CheckpointError::configuration("A consumer is required"))?;

        let codec = match (self.codec, self.codecs) {
            (Some(codec), _) => codec,
            (None, Some(registry)) => registry.resolve(self.config.state_type.as_deref())?,
            (None, None) => {
                return Err(CheckpointError::configuration(
                    "No codec configured: provide a codec or a codec registry",
                ))
            }
        };

        let store = match self.store {
            Some(store) => store,
            None => {
                self.stores
                    .unwrap_or_else(StoreRegistry::with_defaults)
                    .create(&self.config)
                    .await?
            }
        };

        let health = self
            .health
            .unwrap_or_else(|| Arc::new(SharedHealth::new()));

        debug!(
            group_id = %self.config.group_id,
            store = store.backend_type(),
            codec = codec.name(),
            "Built checkpoint engine"
        );

        Ok(CheckpointEngine {
            inner: Arc::new(EngineInner {
                config: self.config,
                store,
                codec,
                consumer,
                cache: PartitionCache::new(),
                liveness: LivenessTracker::new(health),
                initial_state: self.initial_state,
                in_flight: Arc::new(InFlight::default()),
                state: Mutex::new(EngineState::Running),
                partitions: Mutex::new(HashMap::new()),
                next_epoch: AtomicU64::new(0),
                shutdown: ShutdownSignal::new(),
                timers: Mutex::new(Vec::new()),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::partition::PartitionKey;
    use crate::store::MemoryStateStore;

    struct NoopConsumer;

    impl ConsumerControl for NoopConsumer {
        fn seek(&self, _: &PartitionKey, _: i64) {}
        fn pause(&self, _: &[PartitionKey]) {}
        fn resume(&self, _: &[PartitionKey]) {}
    }

    #[tokio::test]
    async fn test_consumer_is_required() {
        let result = CheckpointEngineBuilder::<i64>::new(CheckpointConfig::new("group"))
            .codec(Arc::new(JsonCodec::new()))
            .build()
            .await;
        assert!(matches!(result, Err(CheckpointError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_codec_is_required() {
        let result = CheckpointEngineBuilder::<i64>::new(CheckpointConfig::new("group"))
            .consumer(Arc::new(NoopConsumer))
            .build()
            .await;
        assert!(matches!(result, Err(CheckpointError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let result = CheckpointEngineBuilder::<i64>::new(CheckpointConfig::new(""))
            .codec(Arc::new(JsonCodec::new()))
            .consumer(Arc::new(NoopConsumer))
            .build()
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_defaults_resolve_memory_store_and_json_codec() {
        let engine = CheckpointEngineBuilder::<i64>::new(CheckpointConfig::new("group"))
            .codecs(CodecRegistry::json())
            .consumer(Arc::new(NoopConsumer))
            .build()
            .await
            .unwrap();
        assert_eq!(engine.store().backend_type(), "memory");
        assert_eq!(engine.state(), EngineState::Running);
    }

    #[tokio::test]
    async fn test_unknown_codec_name_is_rejected() {
        let mut config = CheckpointConfig::new("group");
        config.state_type = Some("avro".to_string());
        let result = CheckpointEngineBuilder::<i64>::new(config)
            .codecs(CodecRegistry::json())
            .consumer(Arc::new(NoopConsumer))
            .build()
            .await;
        assert!(matches!(result, Err(CheckpointError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_explicit_store_wins_over_registry() {
        let store = MemoryStateStore::new("group");
        let mut config = CheckpointConfig::new("group");
        config.state_store = "redis".to_string();
        let engine = CheckpointEngineBuilder::<i64>::new(config)
            .store(Arc::new(store))
            .codec(Arc::new(JsonCodec::new()))
            .consumer(Arc::new(NoopConsumer))
            .build()
            .await
            .unwrap();
        assert_eq!(engine.store().backend_type(), "memory");
    }
}
