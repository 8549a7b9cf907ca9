use thiserror::Error;

use crate::codec::CodecError;
use crate::partition::PartitionKey;
use crate::store::StoreError;

/// Result type for checkpoint engine operations
pub type CheckpointResult<T> = Result<T, CheckpointError>;

#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Transient connectivity or timeout failure talking to the store
    #[error("State store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// Non-transient store failure
    #[error("State store error: {0}")]
    Store(#[source] StoreError),

    /// A persisted checkpoint exists but cannot be read
    #[error("Failed to decode checkpoint for {partition}: {message}")]
    Decode {
        partition: PartitionKey,
        message: String,
    },

    /// The prior checkpoint of a newly assigned partition could not be loaded
    #[error("Assignment of {partition} failed: {source}")]
    AssignmentFailure {
        partition: PartitionKey,
        #[source]
        source: Box<CheckpointError>,
    },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The engine no longer accepts work
    #[error("Checkpoint engine is shutting down")]
    ShuttingDown,
}

impl CheckpointError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a decode error for a partition
    pub fn decode(partition: &PartitionKey, message: impl ToString) -> Self {
        Self::Decode {
            partition: partition.clone(),
            message: message.to_string(),
        }
    }

    /// Wrap an error as the assignment failure of `partition`
    pub fn assignment(partition: &PartitionKey, source: CheckpointError) -> Self {
        Self::AssignmentFailure {
            partition: partition.clone(),
            source: Box::new(source),
        }
    }

    /// Whether a later attempt of the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StoreUnavailable(_) => true,
            Self::AssignmentFailure { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

impl From<StoreError> for CheckpointError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Configuration(message) => Self::Configuration(message),
            err if err.is_retryable() => Self::StoreUnavailable(err),
            err => Self::Store(err),
        }
    }
}
