use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use seqid::{
    BatchCache, LockOptions, ManualClock, MemoryStore, SequenceAllocator, SequenceConfig,
    SequenceOptions, SqliteStore, SystemClock, format_component, mint_batch,
};
use std::{
    sync::{Arc, Barrier},
    thread::scope,
    time::{Duration, Instant},
};

// Number of IDs allocated per benchmark iteration (split across threads for
// the contended benchmarks).
const TOTAL_IDS: usize = 4096;

fn fixed_clock() -> ManualClock {
    ManualClock::from_rfc3339("2025-06-17T09:00:00+00:00").unwrap()
}

fn lock_options() -> LockOptions {
    LockOptions::default()
        .with_wait_timeout(Duration::from_secs(60))
        .with_poll_interval(Duration::from_micros(100))
}

fn sample_config(batch_size: u32) -> SequenceConfig {
    SequenceConfig {
        key: "bench".into(),
        prefix: "ORD".into(),
        date_format: "yyyyMMdd".into(),
        padding_length: 10,
        batch_size,
        current_cursor: 1,
        overflow_position: 0,
        last_rollover_date: "20250617".into(),
    }
}

/// Formatting and minting without any store or lock.
fn benchmark_mint(c: &mut Criterion) {
    let mut group = c.benchmark_group("mint");

    group.throughput(Throughput::Elements(1));
    group.bench_function("format_component", |b| {
        b.iter(|| black_box(format_component(black_box(123_456), 10, 0)));
    });

    for batch_size in [1, 100, 1000] {
        let config = sample_config(batch_size);
        group.throughput(Throughput::Elements(u64::from(batch_size)));
        group.bench_function(format!("batch/{batch_size}"), |b| {
            b.iter(|| black_box(mint_batch(&config, "20250617").unwrap()));
        });
    }

    group.finish();
}

/// Pop throughput of a pre-filled cache.
fn benchmark_cache_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("pop/elems/{TOTAL_IDS}"), |b| {
        b.iter_custom(|iters| {
            let mut elapsed = Duration::ZERO;
            for _ in 0..iters {
                let cache = BatchCache::new();
                let ids = mint_batch(&sample_config(TOTAL_IDS as u32), "20250617").unwrap();
                cache.refill("bench", ids.ids, sample_config(1));

                let start = Instant::now();
                for _ in 0..TOTAL_IDS {
                    black_box(cache.pop("bench"));
                }
                elapsed += start.elapsed();
            }
            elapsed
        });
    });

    group.finish();
}

/// Single-threaded allocation across batch sizes. Smaller batches hit the
/// lease path more often.
fn bench_allocator_sequential<S>(c: &mut Criterion, group_name: &str, store_factory: impl Fn() -> S)
where
    S: seqid::LockStore + seqid::SequenceStore,
{
    let mut group = c.benchmark_group(group_name);
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    for batch_size in [1, 16, 256] {
        let options = SequenceOptions::new("ORD").with_batch_size(batch_size);
        group.bench_function(format!("batch/{batch_size}/elems/{TOTAL_IDS}"), |b| {
            b.iter_custom(|iters| {
                let start = Instant::now();
                for _ in 0..iters {
                    let allocator = SequenceAllocator::with_lock_options(
                        Arc::new(store_factory()),
                        fixed_clock(),
                        lock_options(),
                    );
                    for _ in 0..TOTAL_IDS {
                        black_box(allocator.next("bench", &options).unwrap());
                    }
                }
                start.elapsed()
            });
        });
    }

    group.finish();
}

/// One allocator shared by several threads.
fn benchmark_memory_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory/contended");
    let options = SequenceOptions::new("ORD").with_batch_size(64);

    for thread_count in [1, 2, 4, 8] {
        let ids_per_thread = TOTAL_IDS / thread_count;
        group.throughput(Throughput::Elements(TOTAL_IDS as u64));
        group.bench_function(format!("threads/{thread_count}"), |b| {
            b.iter_custom(|iters| {
                let start = Instant::now();
                for _ in 0..iters {
                    let allocator = SequenceAllocator::with_lock_options(
                        Arc::new(MemoryStore::new()),
                        SystemClock::utc(),
                        lock_options(),
                    );
                    let barrier = Barrier::new(thread_count + 1);
                    scope(|s| {
                        for _ in 0..thread_count {
                            s.spawn(|| {
                                barrier.wait();
                                for _ in 0..ids_per_thread {
                                    black_box(allocator.next("bench", &options).unwrap());
                                }
                            });
                        }
                        barrier.wait();
                    });
                }
                start.elapsed()
            });
        });
    }

    group.finish();
}

fn benchmark_memory_sequential(c: &mut Criterion) {
    bench_allocator_sequential(c, "memory/sequential", MemoryStore::new);
}

fn benchmark_sqlite_sequential(c: &mut Criterion) {
    bench_allocator_sequential(c, "sqlite/sequential", || {
        SqliteStore::open_in_memory().unwrap()
    });
}

criterion_group!(
    benches,
    benchmark_mint,
    benchmark_cache_pop,
    benchmark_memory_sequential,
    benchmark_memory_contended,
    benchmark_sqlite_sequential,
);
criterion_main!(benches);
