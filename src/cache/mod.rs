//! Partition state cache
//!
//! A keyed-lock table: the map itself sits behind a short-lived read/write
//! lock, while each partition's state sits behind its own mutex. Record
//! processing on one partition never waits on another partition, and flushes
//! copy an entry's state under its lock before doing any I/O.

pub mod entry;

pub use entry::{CacheEntry, FlushSnapshot, MutatedLiveRef, MutatedSnapshot, PartitionState};

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::partition::PartitionKey;

/// Per-partition state of every currently assigned partition
pub struct PartitionCache<T> {
    entries: RwLock<HashMap<PartitionKey, Arc<CacheEntry<T>>>>,
}

impl<T> Default for PartitionCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PartitionCache<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Create or overwrite the entry for `key`
    pub fn seed(&self, key: PartitionKey, offset: i64, value: Option<T>) -> Arc<CacheEntry<T>> {
        debug!("Seeding cache for {} at offset {}", key, offset);
        let entry = Arc::new(CacheEntry::new(key.clone(), offset, value));
        let previous = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::clone(&entry));
        if let Some(previous) = previous {
            previous.retire();
        }
        entry
    }

    pub fn get(&self, key: &PartitionKey) -> Option<Arc<CacheEntry<T>>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn contains(&self, key: &PartitionKey) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Assigned partitions, sorted
    pub fn keys(&self) -> Vec<PartitionKey> {
        let mut keys: Vec<PartitionKey> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bump the next expected offset of `key`; false if unassigned or not newer
    pub fn advance(&self, key: &PartitionKey, offset: i64) -> bool {
        self.get(key).is_some_and(|entry| entry.advance(offset))
    }

    /// Drop the entry for `key`, returning it for a last look at its state
    pub fn remove(&self, key: &PartitionKey) -> Option<Arc<CacheEntry<T>>> {
        let entry = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)?;
        entry.retire();
        debug!("Removed {} from cache", key);
        Some(entry)
    }

    /// Current entries without holding the map lock afterwards
    pub fn entries(&self) -> Vec<Arc<CacheEntry<T>>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

impl<T: Clone> PartitionCache<T> {
    /// Cached value of `key`; outer `None` when the partition is unassigned
    pub fn current_value(&self, key: &PartitionKey) -> Option<Option<T>> {
        self.get(key).map(|entry| entry.current_value())
    }

    /// Apply `mutator` to the value of `key` and return an owned copy
    pub fn mutate<I, F>(&self, key: &PartitionKey, initial: I, mutator: F) -> Option<MutatedSnapshot<T>>
    where
        I: FnOnce() -> T,
        F: FnOnce(T) -> T,
    {
        self.get(key)
            .map(|entry| entry.mutate_snapshot(initial, mutator))
    }

    /// Snapshots of every dirty entry; dirty bits are left untouched
    pub fn snapshot_dirty(&self) -> Vec<FlushSnapshot<T>> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.is_dirty())
            .map(|entry| entry.snapshot())
            .collect()
    }

    /// Entries whose changes have been unsynced for at least `max_age`, with
    /// their unsynced age
    pub fn stale_entries(&self, max_age: Duration) -> Vec<(Arc<CacheEntry<T>>, Duration)> {
        let now = Instant::now();
        self.entries()
            .into_iter()
            .filter_map(|entry| {
                let age = entry.lock().unsynced_for(now)?;
                (age >= max_age).then_some((entry, age))
            })
            .collect()
    }
}
