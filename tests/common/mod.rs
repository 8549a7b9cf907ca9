//! Common test utilities and helpers

#![allow(dead_code)]

use checkpoint_commit::store::MemoryStateStore;
use checkpoint_commit::{
    AckOutcome, CheckpointConfig, CheckpointEngine, ConsumerControl, JsonCodec, PartitionKey,
    SharedHealth,
};
use serde::{de::DeserializeOwned, Serialize};
use std::ops::Range;
use std::sync::{Arc, Mutex};

/// Call made by the engine on the log client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerEvent {
    Seek(PartitionKey, i64),
    Pause(PartitionKey),
    Resume(PartitionKey),
}

/// Log client that records every call made to it
#[derive(Default)]
pub struct RecordingConsumer {
    events: Mutex<Vec<ConsumerEvent>>,
}

impl RecordingConsumer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ConsumerEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Offset of the last seek issued for `key`
    pub fn last_seek(&self, key: &PartitionKey) -> Option<i64> {
        self.events()
            .into_iter()
            .rev()
            .find_map(|event| match event {
                ConsumerEvent::Seek(k, offset) if &k == key => Some(offset),
                _ => None,
            })
    }

    /// Whether `key` is currently paused according to the recorded calls
    pub fn is_paused(&self, key: &PartitionKey) -> bool {
        self.events()
            .into_iter()
            .rev()
            .find_map(|event| match event {
                ConsumerEvent::Pause(k) if &k == key => Some(true),
                ConsumerEvent::Resume(k) if &k == key => Some(false),
                _ => None,
            })
            .unwrap_or(false)
    }
}

impl ConsumerControl for RecordingConsumer {
    fn seek(&self, key: &PartitionKey, offset: i64) {
        self.events
            .lock()
            .unwrap()
            .push(ConsumerEvent::Seek(key.clone(), offset));
    }

    fn pause(&self, keys: &[PartitionKey]) {
        let mut events = self.events.lock().unwrap();
        events.extend(keys.iter().cloned().map(ConsumerEvent::Pause));
    }

    fn resume(&self, keys: &[PartitionKey]) {
        let mut events = self.events.lock().unwrap();
        events.extend(keys.iter().cloned().map(ConsumerEvent::Resume));
    }
}

pub const GROUP: &str = "test-group";

pub fn key(partition: i32) -> PartitionKey {
    PartitionKey::new("numbers", partition)
}

/// Everything a scenario needs to drive one engine
pub struct Harness<T> {
    pub engine: CheckpointEngine<T>,
    pub consumer: Arc<RecordingConsumer>,
    pub health: SharedHealth,
}

pub async fn harness<T>(store: &MemoryStateStore) -> Harness<T>
where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    harness_with(store, CheckpointConfig::new(GROUP)).await
}

pub async fn harness_with<T>(store: &MemoryStateStore, config: CheckpointConfig) -> Harness<T>
where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    let consumer = RecordingConsumer::new();
    let health = SharedHealth::new();
    let engine = CheckpointEngine::builder(config)
        .store(Arc::new(store.clone()))
        .codec(Arc::new(JsonCodec::new()))
        .consumer(consumer.clone())
        .health(Arc::new(health.clone()))
        .build()
        .await
        .unwrap();
    Harness {
        engine,
        consumer,
        health,
    }
}

/// Add each record's offset to the partition sum, acknowledging every record
pub async fn sum_records(engine: &CheckpointEngine<i64>, key: &PartitionKey, offsets: Range<i64>) {
    for offset in offsets {
        let mut handle = engine
            .receive(key, offset)
            .unwrap_or_else(|| panic!("{} not active at offset {}", key, offset));
        handle.transform(0, |sum| sum + offset);
        engine.acknowledge(handle, AckOutcome::Ack).await;
    }
}

/// Parsed persisted document of `key`
pub async fn stored_document(store: &MemoryStateStore, key: &PartitionKey) -> serde_json::Value {
    let raw = store
        .get_raw(key)
        .await
        .unwrap_or_else(|| panic!("no checkpoint stored for {}", key));
    serde_json::from_slice(&raw).unwrap()
}
