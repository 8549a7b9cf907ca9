//! State store backend implementations

pub mod file;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;
#[cfg(feature = "redis")]
pub use redis::RedisStateStore;
