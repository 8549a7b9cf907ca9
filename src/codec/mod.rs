//! State codecs
//!
//! A codec turns the application state attached to a partition into the bytes
//! stored next to its offset, and back. Codecs are pure transforms. Their
//! output must be a JSON document since stores embed it in the persisted
//! `{"offset", "state"}` envelope.

pub mod registry;

pub use registry::{CodecFactory, CodecRegistry};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use thiserror::Error;

/// Codec error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Failed to encode state: {0}")]
    Encode(String),

    #[error("Failed to decode state: {0}")]
    Decode(String),
}

/// Serializes a partition's state value to bytes and back
///
/// `None` is a legitimate state (explicitly cleared) and must round-trip.
pub trait StateCodec<T>: Send + Sync {
    /// Name under which the codec is registered
    fn name(&self) -> &str;

    fn encode(&self, state: Option<&T>) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<Option<T>, CodecError>;
}

/// Default codec: the state as a plain JSON value, `null` when absent
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StateCodec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn name(&self) -> &str {
        "json"
    }

    fn encode(&self, state: Option<&T>) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(&state).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Option<T>, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
