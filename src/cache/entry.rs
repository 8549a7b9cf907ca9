//! A single partition's cached checkpoint state

use chrono::{DateTime, Utc};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::partition::PartitionKey;

/// In-memory checkpoint state of one assigned partition
#[derive(Debug, Clone)]
pub struct PartitionState<T> {
    next_offset: i64,
    value: Option<T>,
    version: u64,
    persisted_offset: i64,
    persisted_version: u64,
    last_sync: Instant,
    last_sync_at: DateTime<Utc>,
    dirty_since: Option<Instant>,
}

impl<T> PartitionState<T> {
    fn seeded(offset: i64, value: Option<T>) -> Self {
        Self {
            next_offset: offset,
            value,
            version: 0,
            persisted_offset: offset,
            persisted_version: 0,
            last_sync: Instant::now(),
            last_sync_at: Utc::now(),
            dirty_since: None,
        }
    }

    /// Offset of the next record expected on this partition
    pub fn next_offset(&self) -> i64 {
        self.next_offset
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Offset covered by the last successful persist (or the seed)
    pub fn persisted_offset(&self) -> i64 {
        self.persisted_offset
    }

    pub fn is_dirty(&self) -> bool {
        self.next_offset != self.persisted_offset || self.version != self.persisted_version
    }

    /// Wall-clock time of the last successful persist, or of seeding
    pub fn last_sync_at(&self) -> DateTime<Utc> {
        self.last_sync_at
    }

    pub fn last_sync(&self) -> Instant {
        self.last_sync
    }

    /// How long the entry has held changes the store has not seen
    pub fn unsynced_for(&self, now: Instant) -> Option<Duration> {
        self.dirty_since
            .map(|since| now.saturating_duration_since(since))
    }

    fn touch(&mut self) {
        if self.dirty_since.is_none() && self.is_dirty() {
            self.dirty_since = Some(Instant::now());
        }
    }

    fn bump(&mut self) {
        self.version = self.version.wrapping_add(1);
        self.touch();
    }
}

/// Cache slot for one partition: the state behind its own lock plus the gate
/// serialising flushes of that partition
pub struct CacheEntry<T> {
    key: PartitionKey,
    state: Mutex<PartitionState<T>>,
    flush_gate: Arc<AsyncMutex<()>>,
    retired: AtomicBool,
}

impl<T> CacheEntry<T> {
    pub(crate) fn new(key: PartitionKey, offset: i64, value: Option<T>) -> Self {
        Self {
            key,
            state: Mutex::new(PartitionState::seeded(offset, value)),
            flush_gate: Arc::new(AsyncMutex::new(())),
            retired: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &PartitionKey {
        &self.key
    }

    /// Lock the state; a panic in a previous mutator does not wedge the entry
    pub(crate) fn lock(&self) -> MutexGuard<'_, PartitionState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the entry has been removed from the cache
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    pub fn next_offset(&self) -> i64 {
        self.lock().next_offset
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().is_dirty()
    }

    /// Move the next expected offset forward; never moves it back
    pub fn advance(&self, offset: i64) -> bool {
        let mut state = self.lock();
        if offset > state.next_offset {
            state.next_offset = offset;
            state.touch();
            true
        } else {
            false
        }
    }

    /// Replace the cached value, `None` included
    pub fn set(&self, value: Option<T>) {
        let mut state = self.lock();
        state.value = value;
        state.bump();
    }

    /// Seed with `initial` when no value is cached, apply `mutator`, and keep
    /// the entry locked for the caller
    pub fn mutate_live<I, F>(&self, initial: I, mutator: F) -> MutatedLiveRef<'_, T>
    where
        I: FnOnce() -> T,
        F: FnOnce(T) -> T,
    {
        let mut state = self.lock();
        let current = state.value.take().unwrap_or_else(initial);
        state.value = Some(mutator(current));
        state.bump();
        MutatedLiveRef { guard: state }
    }

    /// Wait for exclusive flush rights on this partition
    pub(crate) async fn flush_gate(&self) -> OwnedMutexGuard<()> {
        self.flush_gate.clone().lock_owned().await
    }

    /// Flush rights if no other flush of this partition is in progress
    pub(crate) fn try_flush_gate(&self) -> Option<OwnedMutexGuard<()>> {
        self.flush_gate.clone().try_lock_owned().ok()
    }
}

impl<T: Clone> CacheEntry<T> {
    pub fn current_value(&self) -> Option<T> {
        self.lock().value.clone()
    }

    /// Like [`CacheEntry::mutate_live`] but returns an owned copy of the result
    pub fn mutate_snapshot<I, F>(&self, initial: I, mutator: F) -> MutatedSnapshot<T>
    where
        I: FnOnce() -> T,
        F: FnOnce(T) -> T,
    {
        self.mutate_live(initial, mutator).to_snapshot()
    }

    /// Copy of the full state
    pub fn state(&self) -> PartitionState<T> {
        self.lock().clone()
    }

    /// Capture what a flush would persist
    pub fn snapshot(self: &Arc<Self>) -> FlushSnapshot<T> {
        let state = self.lock();
        FlushSnapshot {
            entry: Arc::clone(self),
            offset: state.next_offset,
            value: state.value.clone(),
            version: state.version,
            taken_at: Instant::now(),
        }
    }
}

/// Borrowed view of a freshly mutated value, valid while the entry stays
/// locked
///
/// Flushes of the partition block until it is dropped; keep it local and never
/// hold it across an `.await`.
pub struct MutatedLiveRef<'a, T> {
    guard: MutexGuard<'a, PartitionState<T>>,
}

impl<T> Deref for MutatedLiveRef<'_, T> {
    type Target = Option<T>;

    fn deref(&self) -> &Option<T> {
        &self.guard.value
    }
}

impl<T: Clone> MutatedLiveRef<'_, T> {
    /// Detach the value from the entry
    pub fn to_snapshot(&self) -> MutatedSnapshot<T> {
        MutatedSnapshot {
            value: self.guard.value.clone(),
        }
    }
}

/// Owned copy of a freshly mutated value, safe to hand downstream
#[derive(Debug, Clone, PartialEq)]
pub struct MutatedSnapshot<T> {
    value: Option<T>,
}

impl<T> MutatedSnapshot<T> {
    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn into_inner(self) -> Option<T> {
        self.value
    }
}

impl<T> Deref for MutatedSnapshot<T> {
    type Target = Option<T>;

    fn deref(&self) -> &Option<T> {
        &self.value
    }
}

/// Consistent `(offset, value, version)` capture of one entry, taken under its
/// lock and persisted without holding it
pub struct FlushSnapshot<T> {
    entry: Arc<CacheEntry<T>>,
    pub offset: i64,
    pub value: Option<T>,
    version: u64,
    taken_at: Instant,
}

impl<T> FlushSnapshot<T> {
    pub fn key(&self) -> &PartitionKey {
        &self.entry.key
    }

    /// Record that this snapshot reached the store
    ///
    /// The entry only becomes clean if nothing changed since the snapshot was
    /// taken; later changes stay dirty for the next cycle. Returns whether the
    /// entry is now clean.
    pub fn mark_persisted(&self) -> bool {
        let mut state = self.entry.lock();
        if (self.version, self.offset) < (state.persisted_version, state.persisted_offset) {
            return !state.is_dirty();
        }

        state.persisted_offset = self.offset;
        state.persisted_version = self.version;
        state.last_sync = Instant::now();
        state.last_sync_at = Utc::now();

        if state.is_dirty() {
            state.dirty_since = Some(self.taken_at);
            false
        } else {
            state.dirty_since = None;
            true
        }
    }
}
