//! Tracked allocation benchmarks.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use memledger_bench::bench_tracker;
use memledger_core::{AllocationSet, LedgerIndex};

fn bench_alloc_free_cycle(c: &mut Criterion) {
    let sizes: &[usize] = &[16, 256, 4096];
    let mut group = c.benchmark_group("alloc_free_cycle");

    for &size in sizes {
        group.bench_with_input(BenchmarkId::new("libc", size), &size, |b, &sz| {
            b.iter(|| {
                // SAFETY: malloc/free pair on a fresh block.
                unsafe {
                    let p = libc::malloc(sz);
                    criterion::black_box(p);
                    libc::free(p);
                }
            });
        });
        for index in [LedgerIndex::Linear, LedgerIndex::Hashed] {
            let tracker = bench_tracker(index);
            let id = BenchmarkId::new(format!("tracked_{index:?}").to_lowercase(), size);
            group.bench_with_input(id, &size, |b, &sz| {
                b.iter(|| {
                    let p = tracker.allocate(sz);
                    criterion::black_box(p);
                    // SAFETY: `p` is a fresh block from `tracker`.
                    unsafe { tracker.deallocate(p) };
                });
            });
        }
    }
    group.finish();
}

/// Free cost with many live records: linear scans pay for ledger size.
fn bench_free_with_live_records(c: &mut Criterion) {
    let live_counts: &[usize] = &[16, 256, 2048];
    let mut group = c.benchmark_group("free_with_live_records");

    for &live in live_counts {
        for index in [LedgerIndex::Linear, LedgerIndex::Hashed] {
            let tracker = bench_tracker(index);
            let mut background = AllocationSet::new(&tracker);
            for _ in 0..live {
                background.allocate(32);
            }
            let id = BenchmarkId::new(format!("{index:?}").to_lowercase(), live);
            group.bench_with_input(id, &live, |b, _| {
                b.iter(|| {
                    let p = tracker.allocate(64);
                    // SAFETY: `p` is a fresh block from `tracker`.
                    unsafe { tracker.deallocate(p) };
                });
            });
            background.rollback();
        }
    }
    group.finish();
}

fn bench_realloc_growth(c: &mut Criterion) {
    let mut group = c.benchmark_group("realloc_growth");
    let tracker = bench_tracker(LedgerIndex::Hashed);

    group.bench_function("16B_to_64KiB_doubling", |b| {
        b.iter(|| {
            let mut block = tracker.allocate_scoped(16);
            let mut size = 16;
            while size < 65_536 {
                size *= 2;
                if let Some(block) = block.as_mut() {
                    block.resize(size);
                }
            }
            criterion::black_box(&block);
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_alloc_free_cycle,
    bench_free_with_live_records,
    bench_realloc_growth
);
criterion_main!(benches);
