use std::cell::Cell;
use std::marker::PhantomData;
use std::num::NonZero;

use crate::{
    DEFAULT_BLOCKS_PER_PAGE, DropPolicy, GrowthPolicy, PagedPool, Result, RetentionPolicy,
    WORD_SIZE,
};

/// Builder for creating an instance of [`PagedPool`].
///
/// [`PagedPool`] requires the block size to be specified at construction time.
/// Use either `.block_size()` to provide a size in bytes or `.block_size_of::<T>()` to size
/// blocks for values of a given type.
///
/// The block size is mandatory, whereas other settings are optional.
///
/// # Examples
///
/// Using a specific size:
///
/// ```
/// use paged_pool::PagedPool;
///
/// let pool = PagedPool::builder().block_size(48).build().unwrap();
/// ```
///
/// Using type-based size:
///
/// ```
/// use paged_pool::PagedPool;
///
/// let pool = PagedPool::builder().block_size_of::<[u64; 4]>().build().unwrap();
/// assert_eq!(pool.block_size(), 32);
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) and can be safely transferred between threads,
/// allowing pool configuration to happen on different threads than where the pool is used.
/// However, it is not thread-safe ([`Sync`]) as it contains mutable configuration state.
#[derive(Debug)]
#[must_use]
pub struct PagedPoolBuilder {
    block_size: Option<usize>,
    blocks_per_page: NonZero<usize>,
    growth_policy: GrowthPolicy,
    retention_policy: RetentionPolicy,
    drop_policy: DropPolicy,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl PagedPoolBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            block_size: None,
            blocks_per_page: DEFAULT_BLOCKS_PER_PAGE,
            growth_policy: GrowthPolicy::default(),
            retention_policy: RetentionPolicy::default(),
            drop_policy: DropPolicy::default(),
            _not_sync: PhantomData,
        }
    }

    /// Sets the payload size of the blocks in the pool, in bytes.
    ///
    /// The size is rounded up to a multiple of the machine word size, with a minimum of
    /// one word.
    #[inline]
    pub fn block_size(mut self, bytes: usize) -> Self {
        self.block_size = Some(bytes);
        self
    }

    /// Sets the payload size of the blocks in the pool to fit a value of type `T`.
    ///
    /// # Panics
    ///
    /// Panics if `T` requires a stricter alignment than a machine word, because block
    /// payloads are only word-aligned.
    ///
    /// # Examples
    ///
    /// ```
    /// use paged_pool::PagedPool;
    ///
    /// let pool = PagedPool::builder().block_size_of::<(u32, u8)>().build().unwrap();
    /// assert_eq!(pool.block_size(), size_of::<usize>());
    /// ```
    #[inline]
    pub fn block_size_of<T>(mut self) -> Self {
        assert!(
            align_of::<T>() <= WORD_SIZE,
            "PagedPool blocks are word-aligned and cannot hold a type aligned to {} bytes",
            align_of::<T>()
        );
        self.block_size = Some(size_of::<T>());
        self
    }

    /// Sets the number of blocks in the first page of the pool.
    ///
    /// Later pages are sized according to the [growth policy][GrowthPolicy].
    #[inline]
    pub fn blocks_per_page(mut self, count: NonZero<usize>) -> Self {
        self.blocks_per_page = count;
        self
    }

    /// Sets the [growth policy][GrowthPolicy] for the pool. This governs how large each new
    /// page is when all existing pages are full.
    #[inline]
    pub fn growth_policy(mut self, policy: GrowthPolicy) -> Self {
        self.growth_policy = policy;
        self
    }

    /// Sets the [retention policy][RetentionPolicy] for the pool. This governs whether the
    /// last page is kept when all of its blocks have been released.
    #[inline]
    pub fn retention_policy(mut self, policy: RetentionPolicy) -> Self {
        self.retention_policy = policy;
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs how
    /// to treat remaining allocated blocks when the pool is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use paged_pool::{DropPolicy, PagedPool};
    ///
    /// let pool = PagedPool::builder()
    ///     .block_size(16)
    ///     .drop_policy(DropPolicy::MustNotDropBlocks)
    ///     .build()
    ///     .unwrap();
    /// ```
    #[inline]
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds the pool with the specified configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityOverflow`][crate::Error::CapacityOverflow] if the block size
    /// is too large to be represented.
    ///
    /// # Panics
    ///
    /// Panics if no block size has been set using either [`block_size`](Self::block_size) or
    /// [`block_size_of`](Self::block_size_of).
    #[inline]
    pub fn build(self) -> Result<PagedPool> {
        let block_size = self.block_size.expect(
            "block size must be set using .block_size() or .block_size_of::<T>() before calling .build()",
        );

        PagedPool::new_inner(
            block_size,
            self.blocks_per_page,
            self.growth_policy,
            self.retention_policy,
            self.drop_policy,
        )
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::Error;

    assert_impl_all!(PagedPoolBuilder: Send, std::fmt::Debug);
    assert_not_impl_any!(PagedPoolBuilder: Sync);

    #[test]
    fn builder_new_creates_default_state() {
        let builder = PagedPoolBuilder::new();

        assert!(builder.block_size.is_none());
        assert_eq!(builder.blocks_per_page, DEFAULT_BLOCKS_PER_PAGE);
        assert_eq!(builder.growth_policy, GrowthPolicy::Double);
        assert_eq!(builder.retention_policy, RetentionPolicy::RetainLastPage);
        assert_eq!(builder.drop_policy, DropPolicy::MayDropBlocks);
    }

    #[test]
    fn block_size_of_uses_type_size() {
        let builder = PagedPoolBuilder::new().block_size_of::<[u8; 20]>();
        assert_eq!(builder.block_size, Some(20));
    }

    #[test]
    #[should_panic]
    fn block_size_of_over_aligned_type_panics() {
        #[repr(align(64))]
        struct CacheLine([u8; 64]);

        let _builder = PagedPoolBuilder::new().block_size_of::<CacheLine>();
    }

    #[test]
    fn block_size_can_be_overridden() {
        let builder = PagedPoolBuilder::new()
            .block_size_of::<u32>()
            .block_size(100);
        assert_eq!(builder.block_size, Some(100));
    }

    #[test]
    fn build_applies_all_settings() {
        let pool = PagedPoolBuilder::new()
            .block_size(40)
            .blocks_per_page(nz!(7))
            .growth_policy(GrowthPolicy::Triple)
            .retention_policy(RetentionPolicy::ReleaseEmptyPages)
            .drop_policy(DropPolicy::MustNotDropBlocks)
            .build()
            .unwrap();

        assert_eq!(pool.block_size(), 40);
        assert_eq!(pool.blocks_per_page(), nz!(7));
        assert_eq!(pool.growth_policy(), GrowthPolicy::Triple);
        assert_eq!(pool.retention_policy(), RetentionPolicy::ReleaseEmptyPages);
    }

    #[test]
    fn zero_block_size_becomes_one_word() {
        let pool = PagedPoolBuilder::new().block_size(0).build().unwrap();
        assert_eq!(pool.block_size(), WORD_SIZE);
    }

    #[test]
    fn oversized_block_size_fails_to_build() {
        let result = PagedPoolBuilder::new().block_size(usize::MAX).build();
        assert!(matches!(result, Err(Error::CapacityOverflow)));
    }

    #[test]
    #[should_panic]
    fn build_without_block_size_panics() {
        let _pool = PagedPoolBuilder::new().build();
    }

    #[test]
    fn builder_can_move_between_threads() {
        let builder = PagedPoolBuilder::new().block_size_of::<u64>();

        let handle = std::thread::spawn(move || builder.build().map(|pool| pool.block_size()));

        assert_eq!(handle.join().unwrap(), Ok(8));
    }
}
