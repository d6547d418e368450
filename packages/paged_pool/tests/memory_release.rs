//! Verifies how `paged_pool` interacts with the global allocator: pages are the only
//! allocations a pool makes, and retiring a page hands its memory back.

#![cfg(not(miri))] // Miri replaces the global allocator, so cannot be used here.
#![allow(
    missing_docs,
    clippy::undocumented_unsafe_blocks,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;

use alloc_tracker::{Allocator, Session};
use new_zealand::nz;
use paged_pool::{Block, GrowthPolicy, PagedPool, RetentionPolicy};

/// Counts the bytes deallocated by the current thread on top of the tracked allocations.
struct DeallocationCounter;

thread_local! {
    static DEALLOCATED_BYTES: Cell<usize> = const { Cell::new(0) };
}

// SAFETY: Every call is forwarded unchanged to the system allocator.
unsafe impl GlobalAlloc for DeallocationCounter {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        _ = DEALLOCATED_BYTES.try_with(|bytes| bytes.set(bytes.get().wrapping_add(layout.size())));

        unsafe { System.dealloc(ptr, layout) }
    }
}

#[global_allocator]
static ALLOCATOR: Allocator<DeallocationCounter> = Allocator::new(DeallocationCounter);

fn deallocated_bytes() -> usize {
    DEALLOCATED_BYTES.with(Cell::get)
}

const BLOCK_SIZE: usize = 64;

fn allocate_many(pool: &mut PagedPool, count: usize) -> Vec<Block> {
    (0..count).map(|_| pool.allocate().unwrap()).collect()
}

#[test]
fn retiring_a_page_returns_its_memory() {
    let mut pool = PagedPool::builder()
        .block_size(BLOCK_SIZE)
        .blocks_per_page(nz!(16))
        .retention_policy(RetentionPolicy::ReleaseEmptyPages)
        .build()
        .unwrap();

    let blocks = allocate_many(&mut pool, 16);
    assert_eq!(pool.page_count(), 1);

    let before = deallocated_bytes();

    for block in blocks {
        pool.release(block);
    }

    assert_eq!(pool.page_count(), 0);
    assert!(deallocated_bytes() - before >= 16 * BLOCK_SIZE);
}

#[test]
fn retained_last_page_keeps_its_memory() {
    let mut pool = PagedPool::new(BLOCK_SIZE, nz!(16), GrowthPolicy::Double).unwrap();

    let blocks = allocate_many(&mut pool, 16);
    let before = deallocated_bytes();

    for block in blocks {
        pool.release(block);
    }

    assert_eq!(pool.page_count(), 1);
    assert!(deallocated_bytes() - before < 16 * BLOCK_SIZE);
}

#[test]
fn new_page_is_the_only_allocation() {
    let session = Session::new();
    let mut pool = PagedPool::new(BLOCK_SIZE, nz!(16), GrowthPolicy::Double).unwrap();

    let first_page = {
        let operation = session.operation("first_allocate");
        {
            let _span = operation.measure_thread();
            let block = pool.allocate().unwrap();
            pool.release(block);
        }
        operation.total_bytes_allocated()
    };

    assert!(first_page >= u64::try_from(16 * BLOCK_SIZE).unwrap());

    let warm = {
        let operation = session.operation("warm_allocate_release");
        {
            let _span = operation.measure_thread().iterations(1000);
            for _ in 0..1000 {
                let block = pool.allocate().unwrap();
                pool.release(block);
            }
        }
        operation.total_bytes_allocated()
    };

    assert_eq!(warm, 0);
}
