//! Durable checkpoint storage
//!
//! A [`StateStore`] keeps exactly one record per partition: the next offset to
//! consume together with the encoded state. Backends are created by name
//! through the [`StoreRegistry`].

pub mod backends;
pub mod error;
pub mod registry;
pub mod traits;
pub mod types;

pub use backends::{FileStateStore, MemoryStateStore};
#[cfg(feature = "redis")]
pub use backends::RedisStateStore;
pub use error::{StoreError, StoreResult};
pub use registry::{StoreFactory, StoreFuture, StoreRegistry};
pub use traits::StateStore;
pub use types::{StoreHealth, StoreRecord};
