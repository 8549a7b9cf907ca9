//! Per-record access to a partition's checkpoint state

use std::fmt;
use std::sync::Arc;

use crate::cache::{CacheEntry, MutatedLiveRef, MutatedSnapshot};
use crate::engine::shutdown::InFlightGuard;
use crate::partition::PartitionKey;

/// Handle attached to one delivered record
///
/// Obtained from [`CheckpointEngine::receive`](crate::CheckpointEngine::receive)
/// and consumed by [`CheckpointEngine::acknowledge`](crate::CheckpointEngine::acknowledge).
/// The record's offset is only committed by the acknowledgement; mutating
/// state does not move it. Dropping the handle without acknowledging leaves
/// the offset where it was.
pub struct CheckpointHandle<T> {
    key: PartitionKey,
    offset: i64,
    entry: Arc<CacheEntry<T>>,
    persist_on_ack: bool,
    _in_flight: InFlightGuard,
}

impl<T> CheckpointHandle<T> {
    pub(crate) fn new(
        key: PartitionKey,
        offset: i64,
        entry: Arc<CacheEntry<T>>,
        in_flight: InFlightGuard,
    ) -> Self {
        Self {
            key,
            offset,
            entry,
            persist_on_ack: false,
            _in_flight: in_flight,
        }
    }

    /// Offset of the record this handle belongs to
    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn partition(&self) -> &PartitionKey {
        &self.key
    }

    /// Apply `mutator` to the partition state, starting from `initial` when no
    /// state exists yet
    ///
    /// The returned reference keeps the partition locked and borrows the
    /// handle mutably, so the handle cannot be used again until it is dropped:
    ///
    /// ```compile_fail
    /// # use checkpoint_commit::CheckpointHandle;
    /// fn sum(mut handle: CheckpointHandle<i64>) {
    ///     let live = handle.transform(0, |sum| sum + 1);
    ///     let _ = handle.current();
    ///     drop(live);
    /// }
    /// ```
    ///
    /// Drop it before doing anything slow, and never hold it across an
    /// `.await`.
    pub fn transform<F>(&mut self, initial: T, mutator: F) -> MutatedLiveRef<'_, T>
    where
        F: FnOnce(T) -> T,
    {
        self.entry.mutate_live(|| initial, mutator)
    }

    /// Like [`transform`](Self::transform), building the initial state only
    /// when it is needed
    pub fn transform_with<I, F>(&mut self, initial: I, mutator: F) -> MutatedLiveRef<'_, T>
    where
        I: FnOnce() -> T,
        F: FnOnce(T) -> T,
    {
        self.entry.mutate_live(initial, mutator)
    }

    /// Replace the partition state; `None` clears it
    pub fn set_next(&self, value: Option<T>) {
        self.entry.set(value);
    }

    /// Persist the partition as soon as this record is acknowledged instead of
    /// waiting for the next commit interval
    pub fn persist_on_ack(&mut self) {
        self.persist_on_ack = true;
    }

    pub(crate) fn persist_requested(&self) -> bool {
        self.persist_on_ack
    }

    pub(crate) fn entry(&self) -> &Arc<CacheEntry<T>> {
        &self.entry
    }
}

impl<T: Clone> CheckpointHandle<T> {
    /// Like [`transform`](Self::transform) but returns an owned copy of the
    /// new state
    pub fn transform_snapshot<F>(&self, initial: T, mutator: F) -> MutatedSnapshot<T>
    where
        F: FnOnce(T) -> T,
    {
        self.entry.mutate_snapshot(|| initial, mutator)
    }

    pub fn transform_with_snapshot<I, F>(&self, initial: I, mutator: F) -> MutatedSnapshot<T>
    where
        I: FnOnce() -> T,
        F: FnOnce(T) -> T,
    {
        self.entry.mutate_snapshot(initial, mutator)
    }

    /// Current partition state
    pub fn current(&self) -> Option<T> {
        self.entry.current_value()
    }
}

impl<T> fmt::Debug for CheckpointHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckpointHandle")
            .field("partition", &self.key)
            .field("offset", &self.offset)
            .field("persist_on_ack", &self.persist_on_ack)
            .finish()
    }
}
