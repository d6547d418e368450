use std::fmt;

use crate::PagedPool;

/// Human-readable description of the pages of a [`PagedPool`].
///
/// One header line with the pool totals, then one line per page in creation order with
/// `#` for each allocated block and `.` for each free block.
pub(crate) struct PoolDump<'p> {
    pool: &'p PagedPool,
}

impl<'p> PoolDump<'p> {
    pub(crate) fn new(pool: &'p PagedPool) -> Self {
        Self { pool }
    }
}

impl fmt::Display for PoolDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "block_size={} total_blocks={} page_count={} allocated={}",
            self.pool.block_size(),
            self.pool.capacity(),
            self.pool.page_count(),
            self.pool.len()
        )?;

        for (position, page_id) in self.pool.page_ids().enumerate() {
            let page = self.pool.page(page_id);

            writeln!(
                f,
                "page {position}: blocks={} free={} [{}]",
                page.block_count(),
                page.free_count(),
                page.occupancy_map()
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use new_zealand::nz;

    use crate::{GrowthPolicy, PagedPool};

    #[test]
    fn empty_pool_has_only_header() {
        let pool = PagedPool::new(8, nz!(4), GrowthPolicy::Double).unwrap();

        let dump = pool.dump();

        assert_eq!(dump.lines().count(), 1);
        assert!(dump.contains("total_blocks=0"));
        assert!(dump.contains("page_count=0"));
        assert!(dump.contains("allocated=0"));
    }

    #[test]
    fn pages_are_listed_in_creation_order() {
        let mut pool = PagedPool::new(8, nz!(2), GrowthPolicy::Double).unwrap();

        let a = pool.allocate().unwrap();
        let _b = pool.allocate().unwrap();
        let _c = pool.allocate().unwrap();
        pool.release(a);

        let dump = pool.dump();
        let lines: Vec<_> = dump.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("total_blocks=4"));
        assert!(lines[0].contains("page_count=2"));
        assert!(lines[0].contains("allocated=2"));
        assert_eq!(lines[1], "page 0: blocks=2 free=1 [.#]");
        assert_eq!(lines[2], "page 1: blocks=2 free=1 [#.]");
    }
}
