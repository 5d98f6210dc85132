//! Waiting-queue benchmarks: heap churn at arena scale.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use toolshare::core::ShareHeap;

fn key_for(slot: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let key = ((slot * 31) % 97) as f64;
    key
}

fn bench_insert_pop(c: &mut Criterion) {
    c.bench_function("heap_insert_pop_1024", |b| {
        b.iter(|| {
            let mut heap = ShareHeap::new(1024);
            for slot in 0..1024 {
                heap.insert(slot, key_for(slot)).unwrap();
            }
            while let Some(slot) = heap.pop_min() {
                black_box(slot);
            }
        });
    });
}

fn bench_indexed_remove(c: &mut Criterion) {
    c.bench_function("heap_indexed_remove_1024", |b| {
        b.iter(|| {
            let mut heap = ShareHeap::new(1024);
            for slot in 0..1024 {
                heap.insert(slot, key_for(slot)).unwrap();
            }
            // Remove from arbitrary positions, the way rests and disconnects
            // pull waiters out of the middle of the queue.
            for slot in (0..1024).rev().step_by(2) {
                heap.remove(slot).unwrap();
            }
            black_box(heap.len());
        });
    });
}

criterion_group!(benches, bench_insert_pop, bench_indexed_remove);
criterion_main!(benches);
