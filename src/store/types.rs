//! Durable record format shared by every store backend

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::error::{StoreError, StoreResult};

/// The durable form of a checkpoint: an offset and the codec-encoded state
///
/// `state` holds the codec output, which must be a JSON document. Backends
/// persist the pair as one `{"offset": .., "state": ..}` document so a reader
/// never observes an offset next to the wrong state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRecord {
    pub offset: i64,
    pub state: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct StoreDocument {
    offset: i64,
    #[serde(default)]
    state: JsonValue,
}

impl StoreRecord {
    /// Create a new record
    pub fn new(offset: i64, state: Vec<u8>) -> Self {
        Self { offset, state }
    }

    /// Render the record as the persisted JSON document
    pub fn to_document(&self) -> StoreResult<Vec<u8>> {
        let state: JsonValue = serde_json::from_slice(&self.state).map_err(|e| {
            StoreError::serialization(format!("state is not a JSON document: {}", e))
        })?;
        let document = StoreDocument {
            offset: self.offset,
            state,
        };
        Ok(serde_json::to_vec(&document)?)
    }

    /// Parse a persisted JSON document
    pub fn from_document(bytes: &[u8]) -> StoreResult<Self> {
        let document: StoreDocument = serde_json::from_slice(bytes)?;
        Ok(Self {
            offset: document.offset,
            state: serde_json::to_vec(&document.state)?,
        })
    }
}

/// Health information reported by a store backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreHealth {
    pub healthy: bool,
    pub backend_type: String,
    pub details: Option<String>,
}

impl StoreHealth {
    pub fn healthy(backend_type: &str) -> Self {
        Self {
            healthy: true,
            backend_type: backend_type.to_string(),
            details: None,
        }
    }

    pub fn unhealthy(backend_type: &str, details: impl Into<String>) -> Self {
        Self {
            healthy: false,
            backend_type: backend_type.to_string(),
            details: Some(details.into()),
        }
    }
}
