//! Basic benchmarks for the `paged_pool` crate, with `Box` as a baseline.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use alloc_tracker::Allocator;
use criterion::{Criterion, criterion_group, criterion_main};
use new_zealand::nz;
use paged_pool::{GrowthPolicy, PagedPool};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

type TestItem = [usize; 4];
const TEST_VALUE: TestItem = [1024; 4];

/// How many blocks a pool is warmed up with before measuring steady-state churn.
const WARM_BLOCKS: usize = 1000;

fn new_pool() -> PagedPool {
    PagedPool::new(size_of::<TestItem>(), nz!(128), GrowthPolicy::Double)
        .expect("a small block size always fits in memory")
}

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("pp_basic");

    let allocs_op = allocs.operation("build_empty");
    group.bench_function("build_empty", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(new_pool()));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("allocate_first");
    group.bench_function("allocate_first", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(new_pool)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for pool in &mut pools {
                _ = black_box(pool.allocate().unwrap());
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("allocate_release_warm");
    group.bench_function("allocate_release_warm", |b| {
        b.iter_custom(|iters| {
            let mut pool = new_pool();

            let warm = iter::repeat_with(|| pool.allocate().unwrap())
                .take(WARM_BLOCKS)
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let block = pool.allocate().unwrap();

                // SAFETY: The block is large enough and aligned for TestItem.
                unsafe { block.ptr().cast::<TestItem>().write(black_box(TEST_VALUE)) };

                pool.release(black_box(block));
            }

            let elapsed = start.elapsed();

            for block in warm {
                pool.release(block);
            }

            elapsed
        });
    });

    let allocs_op = allocs.operation("box_new_drop");
    group.bench_function("box_new_drop", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(Box::new(black_box(TEST_VALUE))));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("iterate_1000");
    group.bench_function("iterate_1000", |b| {
        b.iter_custom(|iters| {
            let mut pool = new_pool();

            let blocks = iter::repeat_with(|| pool.allocate().unwrap())
                .take(WARM_BLOCKS)
                .collect::<Vec<_>>();

            // Every other block is released so iteration has free blocks to skip.
            for block in blocks.iter().step_by(2) {
                pool.release(*block);
            }

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                for block in &pool {
                    black_box(block);
                }
            }

            start.elapsed()
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
