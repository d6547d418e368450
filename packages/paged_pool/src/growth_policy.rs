use std::num::NonZero;

use new_zealand::nz;

/// Determines how many blocks a newly created page holds.
///
/// The first page of a pool always holds the configured
/// [`blocks_per_page`](crate::PagedPoolBuilder::blocks_per_page) baseline. Every later page is
/// sized relative to the capacity the pool already has, so page creation becomes rarer as the
/// pool grows, much like the reallocation schedule of a growable vector.
///
/// # Examples
///
/// ```
/// use paged_pool::{GrowthPolicy, PagedPool};
/// use new_zealand::nz;
///
/// let pool = PagedPool::new(16, nz!(64), GrowthPolicy::Triple).unwrap();
/// assert_eq!(pool.growth_policy(), GrowthPolicy::Triple);
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum GrowthPolicy {
    /// A new page is as large as all existing pages together, doubling the capacity.
    /// This is the default.
    #[default]
    Double,

    /// A new page is twice as large as all existing pages together, tripling the capacity.
    Triple,
}

impl GrowthPolicy {
    /// Calculates the block count of the next page for a pool that currently has
    /// `total_blocks` blocks of capacity.
    ///
    /// Returns `None` if the result cannot be represented.
    #[must_use]
    pub(crate) fn next_page_block_count(
        self,
        total_blocks: usize,
        baseline: NonZero<usize>,
    ) -> Option<NonZero<usize>> {
        let Some(total_blocks) = NonZero::new(total_blocks) else {
            return Some(baseline);
        };

        match self {
            Self::Double => Some(total_blocks),
            Self::Triple => total_blocks.checked_mul(nz!(2)),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn first_page_uses_baseline() {
        assert_eq!(
            GrowthPolicy::Double.next_page_block_count(0, nz!(7)),
            Some(nz!(7))
        );
        assert_eq!(
            GrowthPolicy::Triple.next_page_block_count(0, nz!(7)),
            Some(nz!(7))
        );
    }

    #[test]
    fn double_matches_existing_capacity() {
        assert_eq!(
            GrowthPolicy::Double.next_page_block_count(4, nz!(4)),
            Some(nz!(4))
        );
        assert_eq!(
            GrowthPolicy::Double.next_page_block_count(12, nz!(4)),
            Some(nz!(12))
        );
    }

    #[test]
    fn triple_is_twice_existing_capacity() {
        assert_eq!(
            GrowthPolicy::Triple.next_page_block_count(4, nz!(4)),
            Some(nz!(8))
        );
        assert_eq!(
            GrowthPolicy::Triple.next_page_block_count(12, nz!(4)),
            Some(nz!(24))
        );
    }

    #[test]
    fn triple_overflow_is_reported() {
        assert_eq!(
            GrowthPolicy::Triple.next_page_block_count(usize::MAX, nz!(4)),
            None
        );
    }

    #[test]
    fn default_is_double() {
        assert_eq!(GrowthPolicy::default(), GrowthPolicy::Double);
    }
}
