//! # Checkpoint Commit
//!
//! Commit strategy for partitioned log consumers that keep per-partition
//! state. The state of each partition is persisted together with the offset of
//! the next record to consume, so a consumer that takes over a partition
//! resumes with exactly the state that matches its position in the log.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use checkpoint_commit::{
//!     AckOutcome, CheckpointConfig, CheckpointEngine, CodecRegistry, ConsumerControl,
//!     PartitionKey,
//! };
//!
//! struct Client;
//!
//! impl ConsumerControl for Client {
//!     fn seek(&self, _key: &PartitionKey, _offset: i64) {}
//!     fn pause(&self, _keys: &[PartitionKey]) {}
//!     fn resume(&self, _keys: &[PartitionKey]) {}
//! }
//!
//! # async fn run() -> checkpoint_commit::CheckpointResult<()> {
//! let engine: CheckpointEngine<i64> = CheckpointEngine::builder(CheckpointConfig::new("sums"))
//!     .codecs(CodecRegistry::json())
//!     .consumer(Arc::new(Client))
//!     .build()
//!     .await?;
//! engine.start();
//!
//! let key = PartitionKey::new("numbers", 0);
//! engine.assign(&[key.clone()]).await?;
//!
//! if let Some(mut handle) = engine.receive(&key, 0) {
//!     handle.transform(0, |sum| sum + 7);
//!     engine.acknowledge(handle, AckOutcome::Ack).await;
//! }
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - `cache` - In-memory partition state with dirty tracking
//! - `codec` - Encoding of state values and the codec registry
//! - `config` - Engine configuration from files and environment
//! - `engine` - Assignment, commit timers, revocation and shutdown
//! - `handle` - Per-record access to partition state
//! - `health` - Liveness reporting
//! - `store` - Durable checkpoint stores (memory, file, redis)

pub mod cache;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod engine;
pub mod error;
pub mod handle;
pub mod health;
pub mod partition;
pub mod store;

pub use codec::{CodecRegistry, JsonCodec, StateCodec};
pub use config::CheckpointConfig;
pub use consumer::ConsumerControl;
pub use engine::{
    shutdown_requested, AckOutcome, AssignmentReport, CheckpointEngine, CheckpointEngineBuilder,
    EngineState, FlushReport, PartitionPhase,
};
pub use error::{CheckpointError, CheckpointResult};
pub use handle::CheckpointHandle;
pub use health::{HealthSink, LivenessStatus, SharedHealth};
pub use partition::PartitionKey;
pub use store::{StateStore, StoreError, StoreRecord, StoreRegistry};
