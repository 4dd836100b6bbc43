//! Basic benchmarks for the `region_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use criterion::{Criterion, criterion_group, criterion_main};
use region_pool::{Index, Pool, RawPool, Region};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

type TestItem = usize;
const TEST_VALUE: TestItem = 1024;

/// Number of items in the pre-filled pools used by the iteration benchmarks.
const FILLED_COUNT: usize = 10_000;

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("region_basic");

    group.bench_function("build_empty", |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(RawPool::<TestItem>::new()));
            }

            start.elapsed()
        });
    });

    group.bench_function("allocate_one", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(|| RawPool::<TestItem>::with_capacity(1))
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let start = Instant::now();

            for pool in &mut pools {
                _ = black_box(pool.allocate(black_box(TEST_VALUE)));
            }

            start.elapsed()
        });
    });

    group.bench_function("read_one", |b| {
        b.iter_custom(|iters| {
            let mut pool = RawPool::<TestItem>::new();
            let handle = pool.allocate(TEST_VALUE);

            let start = Instant::now();

            for _ in 0..iters {
                _ = black_box(pool.get(black_box(handle)));
            }

            start.elapsed()
        });
    });

    group.bench_function("allocate_free_cycle", |b| {
        b.iter_custom(|iters| {
            let mut pool = RawPool::<TestItem>::with_capacity(1);

            let start = Instant::now();

            for _ in 0..iters {
                let handle = pool.allocate(black_box(TEST_VALUE));
                pool.free(black_box(handle));
            }

            start.elapsed()
        });
    });

    group.bench_function("region_emplace_free", |b| {
        b.iter_custom(|iters| {
            let mut region = Region::<TestItem>::with_capacity(1);
            let index = Index::new(0);

            let start = Instant::now();

            for _ in 0..iters {
                _ = black_box(region.emplace(black_box(index), TEST_VALUE));
                region.free(black_box(index));
            }

            start.elapsed()
        });
    });

    group.bench_function("iterate_sparse", |b| {
        b.iter_custom(|iters| {
            let mut pool = RawPool::<TestItem>::with_capacity(FILLED_COUNT);
            let handles = (0..FILLED_COUNT)
                .map(|value| pool.allocate(value))
                .collect::<Vec<_>>();

            // Leave every tenth item, so iteration has to skip long free runs.
            for (position, handle) in handles.into_iter().enumerate() {
                if position % 10 != 0 {
                    pool.free(handle);
                }
            }

            let start = Instant::now();

            for _ in 0..iters {
                for value in &pool {
                    _ = black_box(value);
                }
            }

            start.elapsed()
        });
    });

    group.bench_function("borrow_get", |b| {
        b.iter_custom(|iters| {
            let pool = Pool::<TestItem>::new();
            let borrow = pool.allocate(TEST_VALUE);

            let start = Instant::now();

            for _ in 0..iters {
                _ = black_box(black_box(borrow).cloned());
            }

            start.elapsed()
        });
    });

    group.finish();
}
