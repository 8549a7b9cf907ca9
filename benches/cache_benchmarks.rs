//! Benchmarks for the per-record hot path and for committing dirty partitions

use checkpoint_commit::cache::PartitionCache;
use checkpoint_commit::store::MemoryStateStore;
use checkpoint_commit::{
    AckOutcome, CheckpointConfig, CheckpointEngine, ConsumerControl, JsonCodec, PartitionKey,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::sync::Arc;
use tokio::runtime::Runtime;

struct NoopConsumer;

impl ConsumerControl for NoopConsumer {
    fn seek(&self, _: &PartitionKey, _: i64) {}
    fn pause(&self, _: &[PartitionKey]) {}
    fn resume(&self, _: &[PartitionKey]) {}
}

fn bench_cache_mutate(c: &mut Criterion) {
    let cache = PartitionCache::<i64>::new();
    let key = PartitionKey::new("bench", 0);
    cache.seed(key.clone(), 0, Some(0));

    c.bench_function("cache_mutate_and_advance", |b| {
        let mut offset = 0;
        b.iter(|| {
            offset += 1;
            black_box(cache.mutate(&key, || 0, |sum| sum + offset));
            cache.advance(&key, offset);
        })
    });
}

fn bench_snapshot_dirty(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_dirty");
    for partitions in [8, 64, 512] {
        let cache = PartitionCache::<i64>::new();
        for p in 0..partitions {
            cache.seed(PartitionKey::new("bench", p), 0, Some(0));
        }

        group.bench_with_input(
            BenchmarkId::from_parameter(partitions),
            &partitions,
            |b, &partitions| {
                let mut offset = 0;
                b.iter(|| {
                    offset += 1;
                    for p in 0..partitions {
                        cache.advance(&PartitionKey::new("bench", p), offset);
                    }
                    black_box(cache.snapshot_dirty())
                })
            },
        );
    }
    group.finish();
}

fn bench_engine_record_path(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let key = PartitionKey::new("bench", 0);
    let engine: CheckpointEngine<i64> = rt.block_on(async {
        let engine = CheckpointEngine::builder(CheckpointConfig::new("bench"))
            .store(Arc::new(MemoryStateStore::new("bench")))
            .codec(Arc::new(JsonCodec::new()))
            .consumer(Arc::new(NoopConsumer))
            .build()
            .await
            .unwrap();
        engine.assign(&[key.clone()]).await.unwrap();
        engine
    });

    c.bench_function("engine_receive_transform_ack", |b| {
        let mut offset = 0;
        b.to_async(&rt).iter(|| {
            offset += 1;
            let engine = engine.clone();
            let key = key.clone();
            let record = offset;
            async move {
                let mut handle = engine.receive(&key, record).unwrap();
                handle.transform(0, |sum| sum + record);
                engine.acknowledge(handle, AckOutcome::Ack).await;
            }
        })
    });

    c.bench_function("engine_flush_one_dirty_partition", |b| {
        let mut offset = 1_000_000;
        b.to_async(&rt).iter(|| {
            offset += 1;
            let engine = engine.clone();
            let key = key.clone();
            let record = offset;
            async move {
                let handle = engine.receive(&key, record).unwrap();
                engine.acknowledge(handle, AckOutcome::Ack).await;
                black_box(engine.flush().await)
            }
        })
    });
}

criterion_group!(
    benches,
    bench_cache_mutate,
    bench_snapshot_dirty,
    bench_engine_record_path
);

criterion_main!(benches);
