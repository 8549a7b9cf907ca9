//! Moving cached state into the store

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{EngineInner, PartitionPhase};
use crate::cache::{CacheEntry, FlushSnapshot};
use crate::error::{CheckpointError, CheckpointResult};
use crate::health::LivenessProblem;
use crate::store::StoreRecord;

/// Summary of one flush pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Partitions written to the store
    pub persisted: usize,
    /// Dirty partitions left alone because another flush held them
    pub skipped: usize,
    /// Partitions whose write failed; they stay dirty
    pub failed: usize,
}

enum GateMode {
    Wait,
    Skip,
}

enum FlushOutcome {
    Persisted,
    Clean,
    Busy,
    Failed(CheckpointError),
}

impl FlushReport {
    fn record(&mut self, outcome: &FlushOutcome) {
        match outcome {
            FlushOutcome::Persisted => self.persisted += 1,
            FlushOutcome::Busy => self.skipped += 1,
            FlushOutcome::Failed(_) => self.failed += 1,
            FlushOutcome::Clean => {}
        }
    }
}

impl<T> EngineInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn persist_snapshot(&self, snapshot: &FlushSnapshot<T>) -> CheckpointResult<()> {
        let state = self.codec.encode(snapshot.value.as_ref())?;
        let record = StoreRecord::new(snapshot.offset, state);
        self.store_call(self.store.persist(snapshot.key(), &record))
            .await?;

        snapshot.mark_persisted();
        self.liveness.clear(snapshot.key());
        debug!("Committed {} at offset {}", snapshot.key(), snapshot.offset);
        Ok(())
    }

    async fn flush_gated(&self, entry: &Arc<CacheEntry<T>>, mode: GateMode) -> FlushOutcome {
        let _gate = match mode {
            GateMode::Wait => entry.flush_gate().await,
            GateMode::Skip => match entry.try_flush_gate() {
                Some(gate) => gate,
                None => return FlushOutcome::Busy,
            },
        };

        if entry.is_retired() || !entry.is_dirty() {
            return FlushOutcome::Clean;
        }

        let snapshot = entry.snapshot();
        match self.persist_snapshot(&snapshot).await {
            Ok(()) => FlushOutcome::Persisted,
            Err(e) => FlushOutcome::Failed(e),
        }
    }

    /// Flush one partition, waiting for any flush of it already running;
    /// `Ok(false)` when there was nothing to write
    pub(super) async fn flush_entry(&self, entry: &Arc<CacheEntry<T>>) -> CheckpointResult<bool> {
        match self.flush_gated(entry, GateMode::Wait).await {
            FlushOutcome::Persisted => Ok(true),
            FlushOutcome::Clean | FlushOutcome::Busy => Ok(false),
            FlushOutcome::Failed(e) => Err(e),
        }
    }

    fn active_entries(&self) -> Vec<Arc<CacheEntry<T>>> {
        self.cache
            .entries()
            .into_iter()
            .filter(|entry| self.phase(entry.key()) == Some(PartitionPhase::Active))
            .collect()
    }

    /// Periodic commit: persist dirty partitions concurrently
    ///
    /// Failures leave the partition dirty for the next pass and do not affect
    /// liveness; staleness is the forced sync's business.
    pub(super) async fn flush_dirty(&self) -> FlushReport {
        let entries: Vec<_> = self
            .active_entries()
            .into_iter()
            .filter(|entry| entry.is_dirty())
            .collect();

        let outcomes = join_all(
            entries
                .iter()
                .map(|entry| self.flush_gated(entry, GateMode::Skip)),
        )
        .await;

        let mut report = FlushReport::default();
        for (entry, outcome) in entries.iter().zip(&outcomes) {
            report.record(outcome);
            if let FlushOutcome::Failed(e) = outcome {
                warn!("Periodic commit of {} failed: {}", entry.key(), e);
            }
        }
        report
    }

    /// Forced sync: persist partitions unsynced for longer than the maximum
    /// age and flag liveness when that fails
    pub(super) async fn sync_stale(&self) -> FlushReport {
        let Some(max_age) = self.config.max_unsynced_age() else {
            return FlushReport::default();
        };

        let stale: Vec<_> = self
            .cache
            .stale_entries(max_age)
            .into_iter()
            .filter(|(entry, _)| self.phase(entry.key()) == Some(PartitionPhase::Active))
            .collect();
        if stale.is_empty() {
            return FlushReport::default();
        }

        debug!("Forcing sync of {} stale partition(s)", stale.len());
        let outcomes = join_all(
            stale
                .iter()
                .map(|(entry, _)| self.flush_gated(entry, GateMode::Wait)),
        )
        .await;

        let mut report = FlushReport::default();
        for ((entry, age), outcome) in stale.iter().zip(&outcomes) {
            report.record(outcome);
            if let FlushOutcome::Failed(e) = outcome {
                error!(
                    "State of {} unsynced for {:?} and forced sync failed: {}",
                    entry.key(),
                    age,
                    e
                );
                self.liveness.raise(
                    entry.key(),
                    LivenessProblem::Stale {
                        age: *age,
                        error: e.to_string(),
                    },
                );
            }
        }
        report
    }

    /// Final flush: every dirty partition in one batch while holding all
    /// flush gates
    pub(super) async fn flush_all(&self) -> FlushReport {
        let entries = self.cache.entries();
        let mut gates = Vec::with_capacity(entries.len());
        for entry in &entries {
            gates.push(entry.flush_gate().await);
        }

        let mut report = FlushReport::default();
        let mut records = Vec::new();
        let mut encoded = Vec::new();
        for snapshot in self.cache.snapshot_dirty() {
            match self.codec.encode(snapshot.value.as_ref()) {
                Ok(state) => {
                    records.push((
                        snapshot.key().clone(),
                        StoreRecord::new(snapshot.offset, state),
                    ));
                    encoded.push(snapshot);
                }
                Err(e) => {
                    error!("Cannot encode state of {}: {}", snapshot.key(), e);
                    report.failed += 1;
                }
            }
        }

        if records.is_empty() {
            return report;
        }

        match self.store_call(self.store.persist_many(&records)).await {
            Ok(()) => {
                for snapshot in &encoded {
                    snapshot.mark_persisted();
                    self.liveness.clear(snapshot.key());
                }
                report.persisted += encoded.len();
            }
            Err(e) => {
                error!("Final commit of {} partition(s) failed: {}", records.len(), e);
                report.failed += records.len();
            }
        }

        drop(gates);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::config::CheckpointConfig;
    use crate::consumer::ConsumerControl;
    use crate::engine::{AckOutcome, CheckpointEngine};
    use crate::partition::PartitionKey;
    use crate::store::{MemoryStateStore, StateStore};

    struct NoopConsumer;

    impl ConsumerControl for NoopConsumer {
        fn seek(&self, _: &PartitionKey, _: i64) {}
        fn pause(&self, _: &[PartitionKey]) {}
        fn resume(&self, _: &[PartitionKey]) {}
    }

    async fn engine(store: &MemoryStateStore) -> CheckpointEngine<i64> {
        CheckpointEngine::builder(CheckpointConfig::new("group"))
            .store(Arc::new(store.clone()))
            .codec(Arc::new(JsonCodec::new()))
            .consumer(Arc::new(NoopConsumer))
            .build()
            .await
            .unwrap()
    }

    async fn process(engine: &CheckpointEngine<i64>, key: &PartitionKey, offset: i64) {
        let mut handle = engine.receive(key, offset).unwrap();
        handle.transform(0, |sum| sum + offset);
        engine.acknowledge(handle, AckOutcome::Ack).await;
    }

    #[tokio::test]
    async fn test_flush_persists_only_dirty_partitions() {
        let store = MemoryStateStore::new("group");
        let engine = engine(&store).await;
        let a = PartitionKey::new("t", 0);
        let b = PartitionKey::new("t", 1);
        engine.assign(&[a.clone(), b.clone()]).await.unwrap();

        process(&engine, &a, 0).await;
        process(&engine, &a, 1).await;

        let report = engine.flush().await;
        assert_eq!(report, FlushReport { persisted: 1, skipped: 0, failed: 0 });
        assert_eq!(store.get_raw(&a).await.unwrap(), br#"{"offset":2,"state":1}"#.to_vec());
        assert!(store.get_raw(&b).await.is_none());

        assert_eq!(engine.flush().await, FlushReport::default());
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_partition_dirty_and_healthy() {
        let store = MemoryStateStore::new("group");
        let engine = engine(&store).await;
        let key = PartitionKey::new("t", 0);
        engine.assign(&[key.clone()]).await.unwrap();
        process(&engine, &key, 0).await;

        store.set_available(false);
        let report = engine.flush().await;
        assert_eq!(report.failed, 1);
        assert!(engine.partition_state(&key).unwrap().is_dirty());
        assert!(engine.liveness().is_healthy());

        store.set_available(true);
        assert_eq!(engine.flush().await.persisted, 1);
        assert!(!engine.partition_state(&key).unwrap().is_dirty());
    }

    #[tokio::test]
    async fn test_periodic_flush_skips_partition_being_flushed() {
        let store = MemoryStateStore::new("group");
        let engine = engine(&store).await;
        let key = PartitionKey::new("t", 0);
        engine.assign(&[key.clone()]).await.unwrap();
        process(&engine, &key, 0).await;

        let entry = engine.inner.cache.get(&key).unwrap();
        let gate = entry.flush_gate().await;
        let report = engine.flush().await;
        assert_eq!(report.skipped, 1);
        assert_eq!(store.persist_count(), 0);
        drop(gate);

        assert_eq!(engine.flush().await.persisted, 1);
    }

    #[tokio::test]
    async fn test_flush_all_writes_every_dirty_partition() {
        let store = MemoryStateStore::new("group");
        let engine = engine(&store).await;
        let keys: Vec<_> = (0..3).map(|p| PartitionKey::new("t", p)).collect();
        engine.assign(&keys).await.unwrap();
        for key in &keys {
            process(&engine, key, 5).await;
        }

        let report = engine.inner.flush_all().await;
        assert_eq!(report.persisted, 3);
        for key in &keys {
            let record = store.fetch(key).await.unwrap().unwrap();
            assert_eq!(record.offset, 6);
        }
    }
}
