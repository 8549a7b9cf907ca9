//! Control surface of the partitioned-log client

use crate::partition::PartitionKey;

/// Operations the engine needs from the log client
///
/// Calls are made from engine tasks and must not block for long; clients
/// typically enqueue the request for their poll loop.
pub trait ConsumerControl: Send + Sync {
    /// Resume consumption of `key` at `offset`
    fn seek(&self, key: &PartitionKey, offset: i64);

    /// Stop delivering records of `keys`
    fn pause(&self, keys: &[PartitionKey]);

    /// Resume delivering records of `keys`
    fn resume(&self, keys: &[PartitionKey]);
}
