//! End-to-end scenarios that exercise the public API of `paged_pool`.
#![allow(
    missing_docs,
    clippy::indexing_slicing,
    clippy::undocumented_unsafe_blocks,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]

use std::collections::HashSet;

use new_zealand::nz;
use paged_pool::{Block, DropPolicy, Error, GrowthPolicy, PagedPool, RetentionPolicy};

fn allocate_many(pool: &mut PagedPool, count: usize) -> Vec<Block> {
    (0..count).map(|_| pool.allocate().unwrap()).collect()
}

#[test]
fn spans_multiple_pages_with_unique_addresses() {
    let mut pool = PagedPool::new(24, nz!(8), GrowthPolicy::Double).unwrap();

    let blocks = allocate_many(&mut pool, 100);

    let addresses: HashSet<_> = blocks.iter().map(|block| block.ptr()).collect();
    assert_eq!(addresses.len(), 100);

    for block in &blocks {
        assert_eq!(block.size(), 24);
        assert_eq!(block.ptr().as_ptr().addr() % size_of::<usize>(), 0);
    }

    // 8 + 8 + 16 + 32 + 64 blocks.
    assert_eq!(pool.page_count(), 5);
    assert_eq!(pool.capacity(), 128);

    for block in blocks {
        pool.release(block);
    }

    assert!(pool.is_empty());
    assert_eq!(pool.page_count(), 1);
}

#[test]
fn payloads_survive_neighbouring_churn() {
    let mut pool = PagedPool::new(16, nz!(4), GrowthPolicy::Triple).unwrap();

    let keep = allocate_many(&mut pool, 10);
    for (value, block) in (0_u64..).zip(&keep) {
        unsafe { block.ptr().cast::<[u64; 2]>().write([value, !value]) };
    }

    for _ in 0..50 {
        let temporary = allocate_many(&mut pool, 7);
        for block in &temporary {
            unsafe { block.ptr().cast::<[u64; 2]>().write([u64::MAX; 2]) };
        }
        for block in temporary {
            pool.release(block);
        }
    }

    for (value, block) in (0_u64..).zip(&keep) {
        assert_eq!(
            unsafe { block.ptr().cast::<[u64; 2]>().read() },
            [value, !value]
        );
    }
}

#[test]
fn two_page_cursor_walk() {
    let mut pool = PagedPool::new(8, nz!(4), GrowthPolicy::Double).unwrap();

    let blocks = allocate_many(&mut pool, 5);
    assert_eq!(pool.page_count(), 2);

    pool.release(blocks[2]);

    let mut cursor = pool.cursor_at(&blocks[4]);
    assert_eq!(cursor.move_prev(), Some(blocks[3]));
    assert_eq!(cursor.move_prev(), Some(blocks[1]));
    assert_eq!(cursor.move_prev(), Some(blocks[0]));
    assert_eq!(cursor.move_prev(), None);

    let forward: Vec<_> = pool.iter().collect();
    assert_eq!(forward, vec![blocks[0], blocks[1], blocks[3], blocks[4]]);
}

#[test]
fn misuse_is_reported_and_harmless() {
    let mut pool = PagedPool::builder()
        .block_size(8)
        .blocks_per_page(nz!(2))
        .retention_policy(RetentionPolicy::ReleaseEmptyPages)
        .build()
        .unwrap();
    let mut other = PagedPool::new(8, nz!(2), GrowthPolicy::Double).unwrap();

    let a = pool.allocate().unwrap();
    let b = pool.allocate().unwrap();

    assert_eq!(other.try_release(a), Err(Error::ForeignBlock));

    pool.release(a);
    assert_eq!(pool.try_release(a), Err(Error::DoubleRelease));

    pool.release(b);
    assert_eq!(pool.page_count(), 0);
    assert_eq!(pool.try_release(b), Err(Error::UseAfterFree));

    // The pool keeps working after rejecting all of the above.
    let c = pool.allocate().unwrap();
    assert_eq!(pool.len(), 1);
    pool.release(c);
    assert!(pool.is_empty());
}

#[test]
fn stale_handle_cannot_touch_new_occupant() {
    let mut pool = PagedPool::new(8, nz!(4), GrowthPolicy::Double).unwrap();

    let _keep = pool.allocate().unwrap();
    let stale = pool.allocate().unwrap();
    pool.release(stale);

    let current = pool.allocate().unwrap();
    assert_eq!(current.ptr(), stale.ptr());
    unsafe { current.ptr().cast::<u64>().write(99) };

    assert_eq!(pool.try_release(stale), Err(Error::UseAfterFree));
    assert!(pool.try_cursor_at(&stale).is_err());
    assert_eq!(pool.len(), 2);

    assert_eq!(unsafe { current.ptr().cast::<u64>().read() }, 99);
    assert_eq!(pool.try_release(current), Ok(()));
}

#[test]
fn strict_pool_can_be_emptied_and_dropped() {
    let mut pool = PagedPool::builder()
        .block_size_of::<u64>()
        .drop_policy(DropPolicy::MustNotDropBlocks)
        .build()
        .unwrap();

    let blocks = allocate_many(&mut pool, 300);
    for block in blocks {
        pool.release(block);
    }

    drop(pool);
}

#[test]
fn pool_can_move_between_threads() {
    let mut pool = PagedPool::new(8, nz!(16), GrowthPolicy::Double).unwrap();
    let block = pool.allocate().unwrap();

    let (pool, block) = std::thread::spawn(move || {
        unsafe { block.ptr().cast::<u64>().write(7) };
        (pool, block)
    })
    .join()
    .unwrap();

    assert_eq!(unsafe { block.ptr().cast::<u64>().read() }, 7);
    assert_eq!(pool.iter().next(), Some(block));
}

#[test]
fn dump_describes_every_page() {
    let mut pool = PagedPool::new(8, nz!(3), GrowthPolicy::Double).unwrap();

    let blocks = allocate_many(&mut pool, 4);
    pool.release(blocks[1]);

    let dump = pool.dump();

    assert!(dump.contains("page_count=2"));
    assert!(dump.contains("allocated=3"));
    assert!(dump.contains("[#.#]"));
    assert!(dump.contains("[#..]"));
}
