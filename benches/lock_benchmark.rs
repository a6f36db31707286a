//! Benchmarks for the shared-memory lock and the record classifier.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use palin::cancel::CancelToken;
use palin::classify::classify;
use palin::lock::LockState;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

fn bench_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock_uncontended");
    let cancel = CancelToken::new();

    for pool_size in [1, 4, 20].iter() {
        let lock = LockState::boxed();
        lock.initialize(*pool_size).unwrap();
        let participant = lock.participant(0).unwrap();

        group.bench_with_input(
            BenchmarkId::new("acquire_release", pool_size),
            pool_size,
            |b, _| {
                b.iter(|| {
                    let guard = participant.acquire(black_box(&cancel)).unwrap();
                    guard.release();
                });
            },
        );
    }

    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock_contended");

    for contenders in [1usize, 3].iter() {
        let lock = Arc::new(LockState::boxed());
        lock.initialize(contenders + 1).unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        // Background participants hammer the lock while we measure.
        let handles: Vec<_> = (1..=*contenders)
            .map(|id| {
                let lock = Arc::clone(&lock);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    let cancel = CancelToken::new();
                    let participant = lock.participant(id).unwrap();
                    while !stop.load(Ordering::Relaxed) {
                        if let Some(guard) = participant.acquire(&cancel) {
                            guard.release();
                        }
                    }
                })
            })
            .collect();

        let cancel = CancelToken::new();
        let participant = lock.participant(0).unwrap();
        group.bench_with_input(
            BenchmarkId::new("acquire_release", contenders),
            contenders,
            |b, _| {
                b.iter(|| {
                    let guard = participant.acquire(&cancel).unwrap();
                    guard.release();
                });
            },
        );

        stop.store(true, Ordering::Relaxed);
        for handle in handles {
            handle.join().unwrap();
        }
    }

    group.finish();
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    let inputs = [
        ("short_palindrome", "racecar".to_string()),
        ("short_mismatch", "hello".to_string()),
        ("max_record", "Ab".repeat(127)),
    ];

    for (name, text) in inputs.iter() {
        group.bench_with_input(BenchmarkId::new("record", name), text, |b, text| {
            b.iter(|| classify(black_box(text)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_uncontended, bench_contended, bench_classify);
criterion_main!(benches);
