//! Checkpoint commit engine
//!
//! Ties the cache, the store and the log client together:
//!
//! - assignment loads each partition's checkpoint and seeks the client to it
//! - every delivered record gets a [`CheckpointHandle`]; acknowledging it
//!   advances the partition's offset
//! - a timer persists dirty partitions every `auto-commit-interval`, a second
//!   one forces out state left unsynced longer than `unsynced-state-max-age`
//! - revocation flushes a partition before letting it go
//! - shutdown drains in-flight records, then flushes everything

mod assignment;
pub mod builder;
mod flush;
pub mod shutdown;

pub use assignment::AssignmentReport;
pub use builder::CheckpointEngineBuilder;
pub use flush::FlushReport;
pub use shutdown::shutdown_requested;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::{PartitionCache, PartitionState};
use crate::codec::StateCodec;
use crate::config::CheckpointConfig;
use crate::consumer::ConsumerControl;
use crate::handle::CheckpointHandle;
use crate::health::{LivenessStatus, LivenessTracker};
use crate::partition::PartitionKey;
use crate::store::{StateStore, StoreError, StoreResult};
use shutdown::{InFlight, ShutdownSignal};

/// Builds the state of a partition that has no checkpoint yet
pub type InitialState<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Lifecycle of the engine as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Running,
    /// No new records are handed out; in-flight ones are being drained
    Draining,
    Stopped,
}

/// Lifecycle of one partition inside the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionPhase {
    /// Checkpoint fetch in progress
    Assigning,
    /// Store was unreachable; the fetch is retried on the next commit tick
    AwaitingRetry,
    /// Checkpoint exists but cannot be read; the partition stays paused
    Failed,
    Active,
    Revoking,
}

/// How the application finished with a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Ack,
    /// Record was rejected or ignored; its offset is still consumed
    Nack,
}

/// Checkpoint engine for a consumer whose partitions carry state of type `T`
///
/// Cheap to clone; clones drive the same engine.
pub struct CheckpointEngine<T> {
    inner: Arc<EngineInner<T>>,
}

impl<T> Clone for CheckpointEngine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Phase of one partition plus the epoch of the assignment that created it
#[derive(Debug, Clone, Copy)]
struct PartitionSlot {
    phase: PartitionPhase,
    epoch: u64,
}

pub(crate) struct EngineInner<T> {
    config: CheckpointConfig,
    store: Arc<dyn StateStore>,
    codec: Arc<dyn StateCodec<T>>,
    consumer: Arc<dyn ConsumerControl>,
    cache: PartitionCache<T>,
    liveness: LivenessTracker,
    initial_state: Option<InitialState<T>>,
    in_flight: Arc<InFlight>,
    state: Mutex<EngineState>,
    partitions: Mutex<HashMap<PartitionKey, PartitionSlot>>,
    next_epoch: AtomicU64,
    shutdown: ShutdownSignal,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> EngineInner<T> {
    fn phase(&self, key: &PartitionKey) -> Option<PartitionPhase> {
        lock(&self.partitions).get(key).map(|slot| slot.phase)
    }

    /// Mark `key` as loading under a fresh epoch and return it
    fn begin_load(&self, slots: &mut HashMap<PartitionKey, PartitionSlot>, key: &PartitionKey) -> u64 {
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        slots.insert(
            key.clone(),
            PartitionSlot {
                phase: PartitionPhase::Assigning,
                epoch,
            },
        );
        epoch
    }

    fn keys_in(&self, phase: PartitionPhase) -> Vec<PartitionKey> {
        let mut keys: Vec<PartitionKey> = lock(&self.partitions)
            .iter()
            .filter(|(_, slot)| slot.phase == phase)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    fn is_running(&self) -> bool {
        *lock(&self.state) == EngineState::Running
    }

    /// Bound a store call by `store-timeout`
    async fn store_call<F, R>(&self, call: F) -> StoreResult<R>
    where
        F: Future<Output = StoreResult<R>>,
    {
        let limit = self.config.store_timeout;
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or_else(|_| Err(StoreError::Timeout(limit)))
    }
}

impl<T> CheckpointEngine<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Start configuring an engine
    pub fn builder(config: CheckpointConfig) -> CheckpointEngineBuilder<T> {
        CheckpointEngineBuilder::new(config)
    }

    /// Spawn the commit and forced-sync timers; calling it again is a no-op
    pub fn start(&self) {
        let mut timers = lock(&self.inner.timers);
        if !timers.is_empty() || self.inner.shutdown.is_triggered() || !self.inner.is_running() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let commit_interval = self.inner.config.auto_commit_interval;
        timers.push(tokio::spawn(run_timer(
            weak.clone(),
            commit_interval,
            self.inner.shutdown.subscribe(),
            |inner| async move {
                inner.retry_assignments().await;
                let report = inner.flush_dirty().await;
                if report.failed > 0 {
                    warn!(
                        "Periodic commit left {} partition(s) dirty",
                        report.failed
                    );
                }
            },
        )));

        if let Some(interval) = self.inner.config.effective_sync_check_interval() {
            timers.push(tokio::spawn(run_timer(
                weak,
                interval,
                self.inner.shutdown.subscribe(),
                |inner| async move {
                    inner.sync_stale().await;
                },
            )));
        }

        info!(
            group_id = %self.inner.config.group_id,
            store = self.inner.store.backend_type(),
            codec = self.inner.codec.name(),
            "Checkpoint engine started"
        );
    }

    /// Hand out a handle for the record at `offset` of `key`
    ///
    /// Returns `None` when the partition is not active (unassigned, still
    /// loading, failed to load, being revoked) or the engine is shutting down;
    /// the record must not be processed in that case.
    pub fn receive(&self, key: &PartitionKey, offset: i64) -> Option<CheckpointHandle<T>> {
        let state = lock(&self.inner.state);
        if *state != EngineState::Running {
            return None;
        }
        if self.inner.phase(key) != Some(PartitionPhase::Active) {
            debug!("Record {}@{} dropped: partition not active", key, offset);
            return None;
        }
        let entry = self.inner.cache.get(key)?;
        let guard = self.inner.in_flight.enter();
        drop(state);

        Some(CheckpointHandle::new(key.clone(), offset, entry, guard))
    }

    /// Finish a record: its offset is consumed whatever the outcome
    pub async fn acknowledge(&self, handle: CheckpointHandle<T>, outcome: AckOutcome) {
        let entry = Arc::clone(handle.entry());
        entry.advance(handle.offset().saturating_add(1));
        if outcome == AckOutcome::Nack {
            debug!("Record {}@{} nacked", handle.partition(), handle.offset());
        }

        if handle.persist_requested() && !entry.is_retired() {
            if let Err(e) = self.inner.flush_entry(&entry).await {
                warn!(
                    "Persist on acknowledgement failed for {}: {}",
                    handle.partition(),
                    e
                );
            }
        }
    }

    /// Persist every dirty active partition now, skipping partitions whose
    /// flush is already running
    pub async fn flush(&self) -> FlushReport {
        self.inner.retry_assignments().await;
        self.inner.flush_dirty().await
    }

    /// Persist partitions whose state has been unsynced for too long
    pub async fn sync_stale(&self) -> FlushReport {
        self.inner.sync_stale().await
    }

    /// Stop accepting records, drain, flush and close the store
    pub async fn shutdown(&self) -> FlushReport {
        self.inner.shutdown().await
    }

    pub fn state(&self) -> EngineState {
        *lock(&self.inner.state)
    }

    pub fn liveness(&self) -> LivenessStatus {
        self.inner.liveness.status()
    }

    pub fn partition_phase(&self, key: &PartitionKey) -> Option<PartitionPhase> {
        self.inner.phase(key)
    }

    /// Active partitions, sorted
    pub fn assigned_partitions(&self) -> Vec<PartitionKey> {
        self.inner.keys_in(PartitionPhase::Active)
    }

    /// Copy of the cached state of `key`
    pub fn partition_state(&self, key: &PartitionKey) -> Option<PartitionState<T>> {
        self.inner.cache.get(key).map(|entry| entry.state())
    }

    /// Records handed out and not yet acknowledged or dropped
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.count()
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.inner.config
    }
}

impl<T> fmt::Debug for CheckpointEngine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckpointEngine")
            .field("group_id", &self.inner.config.group_id)
            .field("store", &self.inner.store.backend_type())
            .field("state", &*lock(&self.inner.state))
            .finish()
    }
}

/// Run `tick` every `period` until shutdown or until the engine is dropped
///
/// Shutdown only interrupts the wait between ticks, a tick in progress always
/// runs to completion.
async fn run_timer<T, F, Fut>(
    engine: Weak<EngineInner<T>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    tick: F,
) where
    F: Fn(Arc<EngineInner<T>>) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let Some(inner) = engine.upgrade() else {
            break;
        };
        tick(inner).await;
    }
}
