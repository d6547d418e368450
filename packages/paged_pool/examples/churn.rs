//! Stress driver that allocates and releases blocks in random batches.
//!
//! A fixed table of slots holds the blocks currently allocated. Each round picks one of a few
//! operations at random: allocate one, two or three blocks into empty slots, or release one or
//! five blocks from occupied slots. Page creation and retirement are logged via `tracing` and
//! the final state of the pool is printed at the end.
//!
//! Run with `cargo run --example churn`.

use new_zealand::nz;
use paged_pool::{Block, GrowthPolicy, PagedPool};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::Level;

/// Number of slots in the table of allocated blocks.
const SLOTS: usize = 10 * 1024;

const ROUNDS: usize = 200_000;

/// Every this many rounds, a progress line is logged.
const REPORT_INTERVAL: usize = 20_000;

const SEED: u64 = 0x5eed;

struct Driver {
    pool: PagedPool,
    slots: Vec<Option<Block>>,
}

impl Driver {
    fn allocate(&mut self, count: usize) {
        for _ in 0..count {
            let Some(slot) = self.slots.iter_mut().find(|slot| slot.is_none()) else {
                return;
            };

            let block = self.pool.allocate().expect("pool could not grow");

            // SAFETY: Blocks are at least one word long and word-aligned.
            unsafe { block.ptr().cast::<usize>().write(block.ptr().as_ptr().addr()) };

            *slot = Some(block);
        }
    }

    fn release(&mut self, count: usize) {
        for _ in 0..count {
            let Some(block) = self.slots.iter_mut().find_map(Option::take) else {
                return;
            };

            // SAFETY: We wrote the stamp when allocating and nobody else touches the block.
            let stamp = unsafe { block.ptr().cast::<usize>().read() };
            assert_eq!(stamp, block.ptr().as_ptr().addr(), "block payload was corrupted");

            self.pool.release(block);
        }
    }
}

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();

    let pool = PagedPool::new(17, nz!(128), GrowthPolicy::Double).expect("17 bytes always fit");

    let mut driver = Driver {
        pool,
        slots: vec![None; SLOTS],
    };

    let mut rng = SmallRng::seed_from_u64(SEED);

    for round in 1..=ROUNDS {
        match rng.random_range(0..5) {
            0 => driver.allocate(1),
            1 => driver.allocate(2),
            2 => driver.allocate(3),
            3 => driver.release(1),
            _ => driver.release(5),
        }

        if round % REPORT_INTERVAL == 0 {
            tracing::info!(
                round,
                allocated = driver.pool.len(),
                capacity = driver.pool.capacity(),
                pages = driver.pool.page_count(),
                "progress"
            );
        }
    }

    println!("{}", driver.pool.dump());

    driver.release(SLOTS);

    println!("{}", driver.pool.dump());
}
