//! Partition assignment and revocation

use futures::future::join_all;
use std::slice;
use tracing::{debug, error, info, warn};

use super::{lock, CheckpointEngine, EngineInner, PartitionPhase, PartitionSlot};
use crate::error::{CheckpointError, CheckpointResult};
use crate::health::LivenessProblem;
use crate::partition::PartitionKey;
use crate::store::StoreError;

/// Result of an assignment round
#[derive(Debug, Default)]
pub struct AssignmentReport {
    /// Partitions now active, already positioned at their checkpoint
    pub assigned: Vec<PartitionKey>,
    /// Partitions left paused, each as an [`CheckpointError::AssignmentFailure`]
    pub failed: Vec<CheckpointError>,
}

impl AssignmentReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl<T> CheckpointEngine<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Take ownership of newly assigned partitions
    ///
    /// Each partition's checkpoint is fetched concurrently. Loaded partitions
    /// are seeded and the client is told to seek to the stored offset.
    /// Partitions whose checkpoint cannot be loaded are paused and reported
    /// unhealthy; if the store was merely unreachable the load is retried on
    /// every commit tick. Partitions already assigned are ignored.
    pub async fn assign(&self, keys: &[PartitionKey]) -> CheckpointResult<AssignmentReport> {
        self.inner.assign(keys).await
    }

    /// Give up partitions, flushing their state first
    ///
    /// A failed flush is logged and the partition is released anyway.
    pub async fn revoke(&self, keys: &[PartitionKey]) {
        join_all(keys.iter().map(|key| self.inner.revoke_one(key))).await;
    }
}

/// A checkpoint load started by an assignment or a retry
struct PendingLoad {
    key: PartitionKey,
    epoch: u64,
    /// The client was told to pause the partition earlier
    paused: bool,
}

impl<T> EngineInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn assign(&self, keys: &[PartitionKey]) -> CheckpointResult<AssignmentReport> {
        if !self.is_running() {
            return Err(CheckpointError::ShuttingDown);
        }

        let mut pending = Vec::with_capacity(keys.len());
        {
            let mut slots = lock(&self.partitions);
            for key in keys {
                let paused = match slots.get(key).map(|slot| slot.phase) {
                    None => false,
                    Some(PartitionPhase::Failed) => true,
                    Some(phase) => {
                        debug!("Ignoring assignment of {}: already {:?}", key, phase);
                        continue;
                    }
                };
                let epoch = self.begin_load(&mut slots, key);
                pending.push(PendingLoad {
                    key: key.clone(),
                    epoch,
                    paused,
                });
            }
        }

        if !pending.is_empty() {
            info!("Assigning {} partition(s)", pending.len());
        }
        Ok(self.load_partitions(pending).await)
    }

    /// Retry loads that failed because the store was unreachable
    pub(super) async fn retry_assignments(&self) {
        let pending: Vec<PendingLoad> = {
            let mut slots = lock(&self.partitions);
            let waiting: Vec<PartitionKey> = slots
                .iter()
                .filter(|(_, slot)| slot.phase == PartitionPhase::AwaitingRetry)
                .map(|(key, _)| key.clone())
                .collect();
            waiting
                .into_iter()
                .map(|key| {
                    let epoch = self.begin_load(&mut slots, &key);
                    PendingLoad {
                        key,
                        epoch,
                        paused: true,
                    }
                })
                .collect()
        };

        if pending.is_empty() {
            return;
        }

        info!("Retrying checkpoint load for {} partition(s)", pending.len());
        let report = self.load_partitions(pending).await;
        if !report.is_complete() {
            debug!("{} partition(s) still cannot be loaded", report.failed.len());
        }
    }

    /// Load checkpoints and activate partitions whose load is still current
    async fn load_partitions(&self, pending: Vec<PendingLoad>) -> AssignmentReport {
        let results = join_all(pending.iter().map(|load| self.load(&load.key))).await;

        let mut report = AssignmentReport::default();
        for (load, result) in pending.into_iter().zip(results) {
            let key = load.key.clone();
            match result {
                Ok((offset, value)) => {
                    if !self.activate(&load, offset, value) {
                        debug!("Discarding stale load of {}", key);
                        continue;
                    }

                    self.consumer.seek(&key, offset);
                    if load.paused {
                        self.consumer.resume(slice::from_ref(&key));
                    }
                    self.liveness.clear(&key);
                    info!("Assigned {} at offset {}", key, offset);
                    report.assigned.push(key);
                }
                Err(e) => {
                    let next = if e.is_retryable() {
                        PartitionPhase::AwaitingRetry
                    } else {
                        PartitionPhase::Failed
                    };
                    if !self.settle(&load, next) {
                        debug!("Discarding stale load of {}", key);
                        continue;
                    }

                    self.consumer.pause(slice::from_ref(&key));
                    if next == PartitionPhase::Failed {
                        error!("Cannot assign {}: {}", key, e);
                    } else {
                        warn!("Cannot assign {} yet, will retry: {}", key, e);
                    }
                    self.liveness
                        .raise(&key, LivenessProblem::AssignmentFailed(e.to_string()));
                    report.failed.push(CheckpointError::assignment(&key, e));
                }
            }
        }
        report
    }

    /// Seed the cache and mark the partition active, unless a revocation or a
    /// newer assignment superseded this load
    fn activate(&self, load: &PendingLoad, offset: i64, value: Option<T>) -> bool {
        let mut slots = lock(&self.partitions);
        match slots.get_mut(&load.key) {
            Some(slot) if slot.phase == PartitionPhase::Assigning && slot.epoch == load.epoch => {
                self.cache.seed(load.key.clone(), offset, value);
                slot.phase = PartitionPhase::Active;
                true
            }
            _ => false,
        }
    }

    /// Record a failed load, unless it was superseded
    fn settle(&self, load: &PendingLoad, phase: PartitionPhase) -> bool {
        let mut slots = lock(&self.partitions);
        match slots.get_mut(&load.key) {
            Some(slot) if slot.phase == PartitionPhase::Assigning && slot.epoch == load.epoch => {
                slot.phase = phase;
                true
            }
            _ => false,
        }
    }

    /// Fetch and decode the checkpoint of `key`, defaulting to offset 0 and
    /// the initial state when the store has none
    async fn load(&self, key: &PartitionKey) -> CheckpointResult<(i64, Option<T>)> {
        let record = self
            .store_call(self.store.fetch(key))
            .await
            .map_err(|e| match e {
                StoreError::Serialization(message) => CheckpointError::decode(key, message),
                e => CheckpointError::from(e),
            })?;

        match record {
            Some(record) => {
                let value = self
                    .codec
                    .decode(&record.state)
                    .map_err(|e| CheckpointError::decode(key, e))?;
                Ok((record.offset, value))
            }
            None => {
                debug!("No checkpoint for {}, starting from offset 0", key);
                Ok((0, self.initial_state.as_ref().map(|initial| initial())))
            }
        }
    }

    async fn revoke_one(&self, key: &PartitionKey) {
        let previous = {
            let mut slots = lock(&self.partitions);
            let current = slots.get(key).copied();
            match current {
                Some(slot) if slot.phase == PartitionPhase::Active => {
                    slots.insert(
                        key.clone(),
                        PartitionSlot {
                            phase: PartitionPhase::Revoking,
                            epoch: slot.epoch,
                        },
                    );
                }
                Some(slot) if slot.phase == PartitionPhase::Revoking => {}
                Some(_) => {
                    slots.remove(key);
                }
                None => {}
            }
            current.map(|slot| (slot.phase, slot.epoch))
        };

        match previous {
            Some((PartitionPhase::Active, epoch)) => {
                if let Some(entry) = self.cache.get(key) {
                    match self.flush_entry(&entry).await {
                        Ok(true) => debug!("Committed {} before revocation", key),
                        Ok(false) => {}
                        Err(e) => warn!(
                            "Commit of {} on revocation failed, changes since the last commit are dropped: {}",
                            key, e
                        ),
                    }
                }

                let mut slots = lock(&self.partitions);
                if slots.get(key).is_some_and(|slot| slot.epoch == epoch) {
                    slots.remove(key);
                    self.cache.remove(key);
                }
                drop(slots);
                info!("Revoked {}", key);
            }
            Some((PartitionPhase::Revoking, _)) => {
                debug!("Revocation of {} already in progress", key);
                return;
            }
            Some((phase, _)) => debug!("Revoked {} while {:?}", key, phase),
            None => debug!("Revocation of unassigned partition {}", key),
        }
        self.liveness.clear(key);
    }
}
