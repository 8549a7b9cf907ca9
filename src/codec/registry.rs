//! Codec registry keyed by the `state-type` option

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::{JsonCodec, StateCodec};
use crate::error::{CheckpointError, CheckpointResult};

/// Factory function type for creating codecs
pub type CodecFactory<T> = Arc<dyn Fn() -> Arc<dyn StateCodec<T>> + Send + Sync>;

/// Name resolved when no `state-type` is configured
pub const DEFAULT_STATE_TYPE: &str = "json";

/// Registry of codecs available for one state type `T`
///
/// Resolved once at startup; the engine only ever sees the resulting codec.
pub struct CodecRegistry<T> {
    factories: HashMap<String, CodecFactory<T>>,
}

impl<T> Clone for CodecRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            factories: self.factories.clone(),
        }
    }
}

impl<T> Default for CodecRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CodecRegistry<T> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a codec factory under `name`, replacing any previous one
    pub fn register(&mut self, name: impl Into<String>, factory: CodecFactory<T>) -> &mut Self {
        self.factories.insert(name.into(), factory);
        self
    }

    /// Registered codec names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Create the codec selected by `state_type`, or the default one
    pub fn resolve(&self, state_type: Option<&str>) -> CheckpointResult<Arc<dyn StateCodec<T>>> {
        let name = state_type.unwrap_or(DEFAULT_STATE_TYPE);
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| {
                CheckpointError::configuration(format!(
                    "Unknown state-type '{}' (registered: {})",
                    name,
                    self.names().join(", ")
                ))
            })
    }
}

impl<T> CodecRegistry<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    /// Registry with the JSON codec registered as the default
    pub fn json() -> Self {
        let mut registry = Self::new();
        registry.register(
            DEFAULT_STATE_TYPE,
            Arc::new(|| Arc::new(JsonCodec::<T>::new()) as Arc<dyn StateCodec<T>>),
        );
        registry
    }
}
