use std::iter;
use std::num::NonZero;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use new_zealand::nz;

use crate::{
    Block, BlockCoordinates, Blocks, Cursor, DropPolicy, Error, GrowthPolicy, Page, PageId,
    PagedPoolBuilder, PoolDump, Result, RetentionPolicy, SlotLayout,
};

/// Global counter for generating unique pool IDs.
static POOL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generates a unique pool ID.
fn generate_pool_id() -> u64 {
    POOL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Number of blocks in the first page of a pool unless configured otherwise.
#[cfg(not(miri))]
pub(crate) const DEFAULT_BLOCKS_PER_PAGE: NonZero<usize> = nz!(128);

// Under Miri, we use a smaller page because Miri test runtime scales by memory usage.
#[cfg(miri)]
pub(crate) const DEFAULT_BLOCKS_PER_PAGE: NonZero<usize> = nz!(16);

/// A pool of fixed-size memory blocks, served out of a growing set of pages.
///
/// Every block of a pool has the same payload size, chosen when the pool is created and
/// rounded up to a whole number of machine words. Blocks are carved out of large pages instead
/// of being requested from the global allocator one by one, which makes both
/// [`allocate()`](Self::allocate) and [`release()`](Self::release) O(1).
///
/// # Memory management
///
/// The pool starts without any pages. The first allocation creates a page of
/// [`blocks_per_page()`](Self::blocks_per_page) blocks, and every time all pages are full a
/// new page is added whose size follows the pool's [`GrowthPolicy`]. A page whose blocks have
/// all been released is retired and its memory returned to the system, subject to the
/// pool's [`RetentionPolicy`]. Blocks never move once allocated.
///
/// # Iteration
///
/// The allocated blocks can be visited in page creation order, and within a page in address
/// order, either with a bidirectional [`Cursor`] (see [`first()`](Self::first),
/// [`last()`](Self::last) and [`cursor_at()`](Self::cursor_at)) or with the
/// [`iter()`](Self::iter) iterator.
///
/// # Examples
///
/// ```
/// use paged_pool::{GrowthPolicy, PagedPool};
/// use new_zealand::nz;
///
/// let mut pool = PagedPool::new(24, nz!(4), GrowthPolicy::Double).unwrap();
///
/// let a = pool.allocate().unwrap();
/// let b = pool.allocate().unwrap();
///
/// assert_eq!(pool.len(), 2);
/// assert_eq!(pool.capacity(), 4);
/// assert_ne!(a.ptr(), b.ptr());
///
/// pool.release(a);
/// pool.release(b);
///
/// assert!(pool.is_empty());
/// ```
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) and can be moved between threads, but it is not
/// thread-safe ([`Sync`]). Concurrent use requires external synchronization.
#[derive(Debug)]
pub struct PagedPool {
    /// We need to uniquely identify each pool to ensure that blocks are not returned to the
    /// wrong pool.
    pool_id: u64,

    slot_layout: SlotLayout,

    /// Block count of the first page.
    blocks_per_page: NonZero<usize>,

    growth_policy: GrowthPolicy,

    retention_policy: RetentionPolicy,

    drop_policy: DropPolicy,

    /// Arena of pages. Retired pages leave a `None` behind, which a later page may reuse.
    pages: Vec<Option<Page>>,

    /// Arena entries vacated by retired pages.
    vacant_page_ids: Vec<PageId>,

    /// Serial number to give to the next page.
    next_page_serial: u64,

    /// Oldest page, head of the list of all pages in creation order.
    first_page: Option<PageId>,

    /// Newest page, tail of the list of all pages in creation order.
    last_page: Option<PageId>,

    /// Head of the list of pages that have at least one free block. A page is on this list
    /// if and only if it has a free block.
    first_free_page: Option<PageId>,

    /// Sum of the block counts of all pages.
    total_blocks: usize,

    /// Number of pages in the list of all pages.
    page_count: usize,

    /// Number of blocks currently allocated. We track this explicitly to avoid repeatedly
    /// summing across pages when calculating the length.
    allocated: usize,
}

impl PagedPool {
    /// Creates a builder for configuring and constructing a [`PagedPool`].
    ///
    /// You must specify the block size using either `.block_size()` or `.block_size_of::<T>()`
    /// before calling `.build()`.
    ///
    /// # Example
    ///
    /// ```
    /// use paged_pool::{GrowthPolicy, PagedPool};
    /// use new_zealand::nz;
    ///
    /// let pool = PagedPool::builder()
    ///     .block_size(17)
    ///     .blocks_per_page(nz!(128))
    ///     .growth_policy(GrowthPolicy::Double)
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(pool.block_size() % size_of::<usize>(), 0);
    /// assert!(pool.block_size() >= 17);
    /// ```
    #[inline]
    pub fn builder() -> PagedPoolBuilder {
        PagedPoolBuilder::new()
    }

    /// Creates an empty pool of blocks of (at least) `block_size` bytes.
    ///
    /// The first page will hold `blocks_per_page` blocks and later pages are sized by
    /// `growth_policy`. No memory is reserved for blocks until the first allocation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityOverflow`] if the block size, rounded up to whole words and
    /// combined with the per-block header, cannot be represented.
    ///
    /// # Example
    ///
    /// ```
    /// use paged_pool::{GrowthPolicy, PagedPool};
    /// use new_zealand::nz;
    ///
    /// let pool = PagedPool::new(8, nz!(4), GrowthPolicy::Triple).unwrap();
    ///
    /// assert_eq!(pool.page_count(), 0);
    /// assert_eq!(pool.capacity(), 0);
    /// ```
    pub fn new(
        block_size: usize,
        blocks_per_page: NonZero<usize>,
        growth_policy: GrowthPolicy,
    ) -> Result<Self> {
        Self::builder()
            .block_size(block_size)
            .blocks_per_page(blocks_per_page)
            .growth_policy(growth_policy)
            .build()
    }

    /// Creates a new [`PagedPool`] with the specified configuration.
    ///
    /// This method is used internally by the builder to construct the actual pool.
    pub(crate) fn new_inner(
        block_size: usize,
        blocks_per_page: NonZero<usize>,
        growth_policy: GrowthPolicy,
        retention_policy: RetentionPolicy,
        drop_policy: DropPolicy,
    ) -> Result<Self> {
        let slot_layout = SlotLayout::new(block_size)?;

        Ok(Self {
            pool_id: generate_pool_id(),
            slot_layout,
            blocks_per_page,
            growth_policy,
            retention_policy,
            drop_policy,
            pages: Vec::new(),
            vacant_page_ids: Vec::new(),
            next_page_serial: 0,
            first_page: None,
            last_page: None,
            first_free_page: None,
            total_blocks: 0,
            page_count: 0,
            allocated: 0,
        })
    }

    /// The payload size of every block, in bytes.
    ///
    /// This is the requested block size rounded up to a multiple of the machine word size.
    #[must_use]
    #[inline]
    pub fn block_size(&self) -> usize {
        self.slot_layout.block_size().get()
    }

    /// The number of blocks in the first page of the pool.
    #[must_use]
    #[inline]
    pub fn blocks_per_page(&self) -> NonZero<usize> {
        self.blocks_per_page
    }

    /// How new pages are sized when all existing pages are full.
    #[must_use]
    #[inline]
    pub fn growth_policy(&self) -> GrowthPolicy {
        self.growth_policy
    }

    /// Whether the last remaining page is kept when it becomes empty.
    #[must_use]
    #[inline]
    pub fn retention_policy(&self) -> RetentionPolicy {
        self.retention_policy
    }

    /// The number of blocks currently allocated from the pool.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.allocated
    }

    /// Whether no blocks are currently allocated.
    ///
    /// An empty pool may still be holding a page of unused capacity.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.allocated == 0
    }

    /// The number of blocks the pool can hold without creating another page,
    /// including blocks that are currently allocated.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.total_blocks
    }

    /// The number of pages the pool currently holds.
    #[must_use]
    #[inline]
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Allocates one block and returns a handle to it.
    ///
    /// The block is taken from a page that has a free block. If there is none, a new page
    /// is created first, sized according to the pool's [`GrowthPolicy`].
    ///
    /// The payload of the returned block is uninitialized.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if a new page was needed but its memory could not be
    /// allocated, or [`Error::CapacityOverflow`] if the size of the new page cannot be
    /// represented. The pool is left unchanged in either case.
    ///
    /// # Example
    ///
    /// ```
    /// use paged_pool::{GrowthPolicy, PagedPool};
    /// use new_zealand::nz;
    ///
    /// let mut pool = PagedPool::new(8, nz!(2), GrowthPolicy::Double).unwrap();
    ///
    /// let _a = pool.allocate().unwrap();
    /// let _b = pool.allocate().unwrap();
    /// assert_eq!(pool.page_count(), 1);
    ///
    /// // The first page is full, so this creates a second page.
    /// let _c = pool.allocate().unwrap();
    /// assert_eq!(pool.page_count(), 2);
    /// assert_eq!(pool.capacity(), 4);
    /// ```
    pub fn allocate(&mut self) -> Result<Block> {
        let page_id = match self.first_free_page {
            Some(page_id) => page_id,
            None => self.add_page()?,
        };

        let pool_id = self.pool_id;
        let block_size = self.slot_layout.block_size();

        let page = self.page_mut(page_id);

        let index = page
            .pop_free()
            .expect("pages on the free page list always have a free block");

        let coordinates =
            BlockCoordinates::from_parts(page_id, page.serial(), index, page.generation(index));
        let ptr = page.payload_ptr(index);
        let became_full = page.is_full();

        if became_full {
            self.unlink_free(page_id);
        }

        // Cannot overflow because that would imply more blocks than fit in virtual memory.
        self.allocated = self.allocated.wrapping_add(1);

        Ok(Block::new(pool_id, coordinates, ptr, block_size))
    }

    /// Returns a block to the pool.
    ///
    /// The block's memory becomes available for future allocations. If this was the last
    /// allocated block of its page, the page is retired, subject to the pool's
    /// [`RetentionPolicy`].
    ///
    /// # Example
    ///
    /// ```
    /// use paged_pool::PagedPool;
    ///
    /// let mut pool = PagedPool::builder().block_size(32).build().unwrap();
    ///
    /// let block = pool.allocate().unwrap();
    /// assert_eq!(pool.len(), 1);
    ///
    /// pool.release(block);
    /// assert_eq!(pool.len(), 0);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if the block was not allocated from this pool, was already released, or
    /// was released earlier and its memory has since been retired or handed out again. See
    /// [`try_release()`](Self::try_release) for a non-panicking variant.
    #[allow(
        clippy::needless_pass_by_value,
        reason = "the handle is consumed to signal that it must not be used again"
    )]
    pub fn release(&mut self, block: Block) {
        if let Err(error) = self.try_release(block) {
            panic!("cannot release {block:?}: {error}");
        }
    }

    /// Returns a block to the pool, reporting misuse instead of panicking.
    ///
    /// # Errors
    ///
    /// * [`Error::ForeignBlock`] if the block was not allocated from this pool.
    /// * [`Error::UseAfterFree`] if the block's page has already been retired, or its
    ///   memory has since been handed out as a new block.
    /// * [`Error::DoubleRelease`] if the block was already released.
    ///
    /// The pool is left unchanged when an error is returned.
    ///
    /// # Example
    ///
    /// ```
    /// use paged_pool::{Error, GrowthPolicy, PagedPool};
    /// use new_zealand::nz;
    ///
    /// let mut pool = PagedPool::new(8, nz!(8), GrowthPolicy::Double).unwrap();
    ///
    /// let keep = pool.allocate().unwrap();
    /// let block = pool.allocate().unwrap();
    ///
    /// assert_eq!(pool.try_release(block), Ok(()));
    /// assert_eq!(pool.try_release(block), Err(Error::DoubleRelease));
    /// # pool.release(keep);
    /// ```
    #[allow(
        clippy::needless_pass_by_value,
        reason = "the handle is consumed to signal that it must not be used again"
    )]
    pub fn try_release(&mut self, block: Block) -> Result<()> {
        let page_id = self.locate(&block)?;
        let page = self.page_mut(page_id);

        page.push_free(
            block.coordinates.index_in_page(),
            block.coordinates.generation(),
        )?;

        let gained_first_free_block = page.free_count() == 1;
        let became_unused = page.is_unused();

        // Cannot wrap because the page just accepted the block as previously allocated.
        self.allocated = self.allocated.wrapping_sub(1);

        if gained_first_free_block {
            self.link_free_front(page_id);
        }

        if became_unused {
            self.retire_page(page_id);
        }

        Ok(())
    }

    /// Creates a cursor positioned on the first allocated block, together with that block.
    ///
    /// Returns `None` if no blocks are allocated.
    ///
    /// # Example
    ///
    /// ```
    /// use paged_pool::PagedPool;
    ///
    /// let mut pool = PagedPool::builder().block_size(8).build().unwrap();
    /// assert!(pool.first().is_none());
    ///
    /// let a = pool.allocate().unwrap();
    /// let b = pool.allocate().unwrap();
    ///
    /// let (mut cursor, first) = pool.first().unwrap();
    /// assert_eq!(first, a);
    /// assert_eq!(cursor.move_next(), Some(b));
    /// assert_eq!(cursor.move_next(), None);
    /// ```
    #[must_use]
    pub fn first(&self) -> Option<(Cursor<'_>, Block)> {
        Cursor::first(self)
    }

    /// Creates a cursor positioned on the last allocated block, together with that block.
    ///
    /// Returns `None` if no blocks are allocated.
    #[must_use]
    pub fn last(&self) -> Option<(Cursor<'_>, Block)> {
        Cursor::last(self)
    }

    /// Creates a cursor positioned on the given allocated block.
    ///
    /// # Panics
    ///
    /// Panics if the block is not currently allocated from this pool. See
    /// [`try_cursor_at()`](Self::try_cursor_at) for a non-panicking variant.
    #[must_use]
    pub fn cursor_at(&self, block: &Block) -> Cursor<'_> {
        match self.try_cursor_at(block) {
            Ok(cursor) => cursor,
            Err(error) => panic!("cannot position a cursor on {block:?}: {error}"),
        }
    }

    /// Creates a cursor positioned on the given allocated block.
    ///
    /// # Errors
    ///
    /// * [`Error::ForeignBlock`] if the block was not allocated from this pool.
    /// * [`Error::UseAfterFree`] if the block has been released, even if its memory has
    ///   since been handed out as a new block.
    pub fn try_cursor_at(&self, block: &Block) -> Result<Cursor<'_>> {
        let page_id = self.locate(block)?;
        let index = block.coordinates.index_in_page();
        let page = self.page(page_id);

        if index >= page.block_count() {
            return Err(Error::ForeignBlock);
        }

        if !page.is_live(index, block.coordinates.generation()) {
            return Err(Error::UseAfterFree);
        }

        Ok(Cursor::at(self, page_id, index))
    }

    /// Returns an iterator over all allocated blocks.
    ///
    /// Blocks are visited in page creation order and, within a page, in address order.
    /// The iterator is double-ended, so it can also be consumed from the back.
    ///
    /// # Example
    ///
    /// ```
    /// use paged_pool::PagedPool;
    ///
    /// let mut pool = PagedPool::builder().block_size(8).build().unwrap();
    ///
    /// let a = pool.allocate().unwrap();
    /// let b = pool.allocate().unwrap();
    /// let c = pool.allocate().unwrap();
    /// pool.release(b);
    ///
    /// let blocks: Vec<_> = pool.iter().collect();
    /// assert_eq!(blocks, vec![a, c]);
    ///
    /// let reversed: Vec<_> = pool.iter().rev().collect();
    /// assert_eq!(reversed, vec![c, a]);
    /// ```
    #[must_use]
    pub fn iter(&self) -> Blocks<'_> {
        Blocks::new(self)
    }

    /// Renders a human-readable description of the pool's pages for debugging.
    ///
    /// The output lists the block size, total capacity, page count and number of allocated
    /// blocks, followed by one line per page (in creation order) with a map of its blocks:
    /// `#` for an allocated block and `.` for a free one. The format is not stable.
    ///
    /// # Example
    ///
    /// ```
    /// use paged_pool::{GrowthPolicy, PagedPool};
    /// use new_zealand::nz;
    ///
    /// let mut pool = PagedPool::new(8, nz!(4), GrowthPolicy::Double).unwrap();
    /// let _a = pool.allocate().unwrap();
    ///
    /// let dump = pool.dump();
    /// assert!(dump.contains("page_count=1"));
    /// assert!(dump.contains("[#...]"));
    /// ```
    #[must_use]
    pub fn dump(&self) -> String {
        PoolDump::new(self).to_string()
    }

    pub(crate) fn pool_id(&self) -> u64 {
        self.pool_id
    }

    pub(crate) fn first_page_id(&self) -> Option<PageId> {
        self.first_page
    }

    pub(crate) fn last_page_id(&self) -> Option<PageId> {
        self.last_page
    }

    /// Iterates over the IDs of all pages in creation order.
    pub(crate) fn page_ids(&self) -> impl Iterator<Item = PageId> + '_ {
        iter::successors(self.first_page, |page_id| self.page(*page_id).links().next)
    }

    pub(crate) fn page(&self, page_id: PageId) -> &Page {
        self.pages
            .get(page_id.index())
            .and_then(Option::as_ref)
            .expect("page IDs held by the pool always refer to live pages")
    }

    fn page_mut(&mut self, page_id: PageId) -> &mut Page {
        self.pages
            .get_mut(page_id.index())
            .and_then(Option::as_mut)
            .expect("page IDs held by the pool always refer to live pages")
    }

    /// Creates the handle of an allocated block.
    pub(crate) fn block_at(&self, page_id: PageId, index: usize) -> Block {
        let page = self.page(page_id);

        Block::new(
            self.pool_id,
            BlockCoordinates::from_parts(page_id, page.serial(), index, page.generation(index)),
            page.payload_ptr(index),
            self.slot_layout.block_size(),
        )
    }

    /// Finds the live page a block handle refers to.
    fn locate(&self, block: &Block) -> Result<PageId> {
        if block.pool_id != self.pool_id {
            return Err(Error::ForeignBlock);
        }

        let page_id = block.coordinates.page_id();

        self.pages
            .get(page_id.index())
            .and_then(Option::as_ref)
            .filter(|page| page.serial() == block.coordinates.page_serial())
            .map(|_| page_id)
            .ok_or(Error::UseAfterFree)
    }

    /// Creates a new page, links it into both page lists and returns its ID.
    ///
    /// Leaves the pool unchanged if the page cannot be created.
    fn add_page(&mut self) -> Result<PageId> {
        let block_count = self
            .growth_policy
            .next_page_block_count(self.total_blocks, self.blocks_per_page)
            .ok_or(Error::CapacityOverflow)?;

        let total_blocks = self
            .total_blocks
            .checked_add(block_count.get())
            .ok_or(Error::CapacityOverflow)?;

        let serial = self.next_page_serial;
        let mut page = Page::new(serial, self.slot_layout, block_count)?;

        // Nothing below can fail, so we can start mutating the pool.
        page.links_mut().prev = self.last_page;

        let page_id = if let Some(page_id) = self.vacant_page_ids.pop() {
            let entry = self
                .pages
                .get_mut(page_id.index())
                .expect("vacant page IDs always refer to existing arena entries");
            debug_assert!(entry.is_none());
            *entry = Some(page);
            page_id
        } else {
            self.pages.push(Some(page));
            // Cannot wrap because we just pushed an entry.
            PageId::new(self.pages.len().wrapping_sub(1))
        };

        match self.last_page {
            Some(previous) => self.page_mut(previous).links_mut().next = Some(page_id),
            None => self.first_page = Some(page_id),
        }
        self.last_page = Some(page_id);

        self.link_free_front(page_id);

        // Serials are 64 bits and we create at most one page per call, so this never wraps.
        self.next_page_serial = serial.wrapping_add(1);
        self.total_blocks = total_blocks;
        // Cannot overflow because every page holds at least one block, bounded by total_blocks.
        self.page_count = self.page_count.wrapping_add(1);

        tracing::debug!(
            pool_id = self.pool_id,
            page_serial = serial,
            block_count = block_count.get(),
            total_blocks = self.total_blocks,
            page_count = self.page_count,
            "added page"
        );

        Ok(page_id)
    }

    /// Retires a page that no longer has any allocated blocks, unless the retention
    /// policy says to keep it.
    fn retire_page(&mut self, page_id: PageId) {
        if self.retention_policy == RetentionPolicy::RetainLastPage && self.page_count == 1 {
            tracing::trace!(
                pool_id = self.pool_id,
                page_serial = self.page(page_id).serial(),
                "retaining last page"
            );
            return;
        }

        self.unlink_free(page_id);
        self.unlink_all(page_id);

        let page = self
            .pages
            .get_mut(page_id.index())
            .and_then(Option::take)
            .expect("only live pages are retired");
        self.vacant_page_ids.push(page_id);

        // Cannot wrap because the page was counted in both when it was added.
        self.page_count = self.page_count.wrapping_sub(1);
        self.total_blocks = self.total_blocks.wrapping_sub(page.block_count());

        tracing::debug!(
            pool_id = self.pool_id,
            page_serial = page.serial(),
            block_count = page.block_count(),
            total_blocks = self.total_blocks,
            page_count = self.page_count,
            "retired page"
        );

        // Dropping the page returns its memory to the system.
        drop(page);
    }

    /// Inserts a page at the front of the free page list.
    fn link_free_front(&mut self, page_id: PageId) {
        let next_free = self.first_free_page;

        let links = self.page_mut(page_id).links_mut();
        links.prev_free = None;
        links.next_free = next_free;

        if let Some(next_free) = next_free {
            self.page_mut(next_free).links_mut().prev_free = Some(page_id);
        }

        self.first_free_page = Some(page_id);
    }

    /// Removes a page from the free page list. The page must be on the list.
    fn unlink_free(&mut self, page_id: PageId) {
        let links = self.page(page_id).links();

        match links.prev_free {
            Some(prev_free) => self.page_mut(prev_free).links_mut().next_free = links.next_free,
            None => {
                debug_assert_eq!(self.first_free_page, Some(page_id));
                self.first_free_page = links.next_free;
            }
        }

        if let Some(next_free) = links.next_free {
            self.page_mut(next_free).links_mut().prev_free = links.prev_free;
        }

        let links = self.page_mut(page_id).links_mut();
        links.prev_free = None;
        links.next_free = None;
    }

    /// Removes a page from the list of all pages.
    fn unlink_all(&mut self, page_id: PageId) {
        let links = self.page(page_id).links();

        match links.prev {
            Some(prev) => self.page_mut(prev).links_mut().next = links.next,
            None => self.first_page = links.next,
        }

        match links.next {
            Some(next) => self.page_mut(next).links_mut().prev = links.prev,
            None => self.last_page = links.prev,
        }

        let links = self.page_mut(page_id).links_mut();
        links.prev = None;
        links.next = None;
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(test)]
    pub(crate) fn integrity_check(&self) {
        let mut observed_pages: usize = 0;
        let mut observed_blocks: usize = 0;
        let mut observed_free: usize = 0;
        let mut pages_with_free_blocks: usize = 0;
        let mut previous: Option<PageId> = None;

        for page_id in self.page_ids() {
            let page = self.page(page_id);
            page.integrity_check();

            assert_eq!(
                page.links().prev,
                previous,
                "page {} has a broken back link in the list of all pages",
                page.serial()
            );

            observed_pages += 1;
            observed_blocks += page.block_count();
            observed_free += page.free_count();

            if page.free_count() > 0 {
                pages_with_free_blocks += 1;
            }

            previous = Some(page_id);

            assert!(
                observed_pages <= self.pages.len(),
                "the list of all pages has a cycle"
            );
        }

        assert_eq!(previous, self.last_page, "last page does not end the page list");
        assert_eq!(observed_pages, self.page_count, "page count is out of sync");
        assert_eq!(
            self.pages.iter().flatten().count(),
            self.page_count,
            "the arena holds pages that are not in the list of all pages"
        );
        assert_eq!(observed_blocks, self.total_blocks, "total blocks is out of sync");
        assert_eq!(
            self.total_blocks - observed_free,
            self.allocated,
            "allocated count is out of sync"
        );

        let mut free_list_length: usize = 0;
        let mut previous_free: Option<PageId> = None;

        for page_id in iter::successors(self.first_free_page, |page_id| {
            self.page(*page_id).links().next_free
        }) {
            let page = self.page(page_id);

            assert!(
                page.free_count() > 0,
                "full page {} is on the free page list",
                page.serial()
            );
            assert_eq!(
                page.links().prev_free,
                previous_free,
                "page {} has a broken back link in the free page list",
                page.serial()
            );

            free_list_length += 1;
            previous_free = Some(page_id);

            assert!(
                free_list_length <= self.page_count,
                "the free page list has a cycle or a duplicate"
            );
        }

        // Every member has free blocks and there are no duplicates, so equal counts
        // mean every page with free blocks is a member.
        assert_eq!(
            free_list_length, pages_with_free_blocks,
            "a page with free blocks is missing from the free page list"
        );
    }
}

impl Drop for PagedPool {
    fn drop(&mut self) {
        let outstanding = self.allocated;

        // Releases the memory of every page.
        self.pages.clear();

        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if !thread::panicking() && matches!(self.drop_policy, DropPolicy::MustNotDropBlocks) {
            assert!(
                outstanding == 0,
                "dropped a PagedPool with {outstanding} allocated blocks - this is forbidden by DropPolicy::MustNotDropBlocks"
            );
        }
    }
}

impl<'p> IntoIterator for &'p PagedPool {
    type Item = Block;
    type IntoIter = Blocks<'p>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::collections::HashMap;

    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(PagedPool: Send, std::fmt::Debug);
    assert_not_impl_any!(PagedPool: Sync);

    fn pool(blocks_per_page: NonZero<usize>, growth_policy: GrowthPolicy) -> PagedPool {
        PagedPool::new(8, blocks_per_page, growth_policy).unwrap()
    }

    fn page_sizes(pool: &PagedPool) -> Vec<usize> {
        pool.page_ids()
            .map(|page_id| pool.page(page_id).block_count())
            .collect()
    }

    #[test]
    fn smoke_test() {
        let mut pool = pool(nz!(4), GrowthPolicy::Double);

        assert!(pool.is_empty());
        assert_eq!(pool.page_count(), 0);
        assert_eq!(pool.capacity(), 0);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();

        assert_eq!(pool.len(), 3);
        assert_eq!(pool.page_count(), 1);
        assert_eq!(pool.capacity(), 4);
        pool.integrity_check();

        pool.release(b);
        assert_eq!(pool.len(), 2);
        pool.integrity_check();

        pool.release(a);
        pool.release(c);
        assert!(pool.is_empty());
        pool.integrity_check();
    }

    #[test]
    fn creation_allocates_no_pages() {
        let pool = pool(nz!(16), GrowthPolicy::Triple);

        assert_eq!(pool.page_count(), 0);
        assert!(pool.first_page_id().is_none());
        assert!(pool.last_page_id().is_none());
        pool.integrity_check();
    }

    #[test]
    fn block_size_is_rounded_to_word() {
        let pool = PagedPool::new(17, nz!(4), GrowthPolicy::Double).unwrap();

        assert_eq!(pool.block_size() % size_of::<usize>(), 0);
        assert!(pool.block_size() >= 17);
        assert!(pool.block_size() < 17 + size_of::<usize>());
    }

    #[test]
    fn payload_round_trip() {
        let mut pool = PagedPool::new(32, nz!(3), GrowthPolicy::Double).unwrap();

        let blocks: Vec<_> = (0..10_u8).map(|_| pool.allocate().unwrap()).collect();

        for (value, block) in (0_u8..).zip(&blocks) {
            assert_eq!(block.size(), 32);
            unsafe { block.ptr().cast::<[u8; 32]>().write([value; 32]) };
        }

        for (value, block) in (0_u8..).zip(&blocks) {
            assert_eq!(unsafe { block.ptr().cast::<[u8; 32]>().read() }, [value; 32]);
        }

        pool.integrity_check();
    }

    #[test]
    fn double_growth_matches_existing_capacity() {
        let mut pool = pool(nz!(4), GrowthPolicy::Double);

        let _blocks: Vec<_> = (0..17).map(|_| pool.allocate().unwrap()).collect();

        assert_eq!(page_sizes(&pool), vec![4, 4, 8, 16]);
        assert_eq!(pool.capacity(), 32);
        pool.integrity_check();
    }

    #[test]
    fn triple_growth_is_twice_existing_capacity() {
        let mut pool = pool(nz!(4), GrowthPolicy::Triple);

        let _blocks: Vec<_> = (0..13).map(|_| pool.allocate().unwrap()).collect();

        assert_eq!(page_sizes(&pool), vec![4, 8, 24]);
        assert_eq!(pool.capacity(), 36);
        pool.integrity_check();
    }

    #[test]
    fn full_page_leaves_free_page_list() {
        let mut pool = pool(nz!(2), GrowthPolicy::Double);

        let _a = pool.allocate().unwrap();
        let _b = pool.allocate().unwrap();

        assert!(pool.first_free_page.is_none());
        pool.integrity_check();
    }

    #[test]
    fn release_into_full_page_makes_it_allocatable_again() {
        let mut pool = pool(nz!(2), GrowthPolicy::Double);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        let d = pool.allocate().unwrap();
        assert_eq!(pool.page_count(), 2);

        // Both pages are full. Releasing into the first must put it back on the free list.
        pool.release(a);
        pool.integrity_check();

        let e = pool.allocate().unwrap();
        assert_eq!(e.ptr(), a.ptr());
        assert_eq!(pool.page_count(), 2);
        assert_eq!(pool.capacity(), 4);
        pool.integrity_check();

        for block in [b, c, d, e] {
            pool.release(block);
        }
        pool.integrity_check();
    }

    #[test]
    fn empty_page_is_retired() {
        let mut pool = pool(nz!(2), GrowthPolicy::Double);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        let d = pool.allocate().unwrap();
        assert_eq!(pool.page_count(), 2);

        let second_page = c.coordinates.page_id();

        pool.release(c);
        pool.release(d);

        assert_eq!(pool.page_count(), 1);
        assert_eq!(pool.capacity(), 2);
        assert!(pool.page_ids().all(|page_id| page_id != second_page));
        assert!(pool.first_free_page.is_none());
        pool.integrity_check();

        pool.release(a);
        pool.release(b);
        pool.integrity_check();
    }

    #[test]
    fn retiring_the_oldest_page_fixes_list_endpoints() {
        let mut pool = pool(nz!(1), GrowthPolicy::Double);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        assert_eq!(page_sizes(&pool), vec![1, 1, 2]);

        pool.release(a);
        assert_eq!(pool.first_page_id(), Some(b.coordinates.page_id()));
        pool.integrity_check();

        pool.release(c);
        assert_eq!(pool.last_page_id(), Some(b.coordinates.page_id()));
        assert_eq!(pool.page_count(), 1);
        pool.integrity_check();

        pool.release(b);
        pool.integrity_check();
    }

    #[test]
    fn last_page_is_retained_by_default() {
        let mut pool = pool(nz!(4), GrowthPolicy::Double);
        assert_eq!(pool.retention_policy(), RetentionPolicy::RetainLastPage);

        let blocks: Vec<_> = (0..4).map(|_| pool.allocate().unwrap()).collect();
        for block in blocks {
            pool.release(block);
        }

        assert_eq!(pool.page_count(), 1);
        assert_eq!(pool.capacity(), 4);
        assert!(pool.is_empty());
        pool.integrity_check();

        // The retained page serves the next allocation without creating a new one.
        let block = pool.allocate().unwrap();
        assert_eq!(pool.page_count(), 1);
        pool.release(block);
    }

    #[test]
    fn last_page_is_released_when_configured() {
        let mut pool = PagedPool::builder()
            .block_size(8)
            .blocks_per_page(nz!(4))
            .retention_policy(RetentionPolicy::ReleaseEmptyPages)
            .build()
            .unwrap();

        let blocks: Vec<_> = (0..4).map(|_| pool.allocate().unwrap()).collect();
        for block in blocks {
            pool.release(block);
        }

        assert_eq!(pool.page_count(), 0);
        assert_eq!(pool.capacity(), 0);
        assert!(pool.first_page_id().is_none());
        assert!(pool.first_free_page.is_none());
        pool.integrity_check();

        // Without any capacity, the next page is sized from the baseline again.
        let block = pool.allocate().unwrap();
        assert_eq!(pool.capacity(), 4);
        pool.release(block);
    }

    #[test]
    fn retired_arena_entry_is_reused() {
        let mut pool = PagedPool::builder()
            .block_size(8)
            .blocks_per_page(nz!(1))
            .retention_policy(RetentionPolicy::ReleaseEmptyPages)
            .build()
            .unwrap();

        let a = pool.allocate().unwrap();
        pool.release(a);

        let b = pool.allocate().unwrap();

        assert_eq!(pool.pages.len(), 1);
        assert_eq!(a.coordinates.page_id(), b.coordinates.page_id());
        assert_ne!(a.coordinates.page_serial(), b.coordinates.page_serial());

        // The stale handle must not be mistaken for the new block.
        assert_eq!(pool.try_release(a), Err(Error::UseAfterFree));
        assert_eq!(pool.len(), 1);
        pool.release(b);
    }

    #[test]
    fn double_release_is_detected() {
        let mut pool = pool(nz!(4), GrowthPolicy::Double);

        let keep = pool.allocate().unwrap();
        let block = pool.allocate().unwrap();

        pool.release(block);
        assert_eq!(pool.try_release(block), Err(Error::DoubleRelease));
        assert_eq!(pool.len(), 1);
        pool.integrity_check();

        pool.release(keep);
    }

    #[test]
    fn stale_handle_to_reused_slot_is_rejected() {
        let mut pool = pool(nz!(4), GrowthPolicy::Double);

        let keep = pool.allocate().unwrap();
        let stale = pool.allocate().unwrap();
        pool.release(stale);

        let current = pool.allocate().unwrap();
        assert_eq!(current.ptr(), stale.ptr());
        assert_ne!(current, stale);

        assert_eq!(pool.try_release(stale), Err(Error::UseAfterFree));
        assert_eq!(pool.len(), 2);
        assert!(matches!(
            pool.try_cursor_at(&stale),
            Err(Error::UseAfterFree)
        ));
        pool.integrity_check();

        // The current occupant is unaffected and can still be found and released.
        assert_eq!(pool.cursor_at(&current).current(), Some(current));
        assert_eq!(pool.iter().collect::<Vec<_>>(), vec![keep, current]);
        pool.release(current);
        pool.release(keep);
        assert!(pool.is_empty());
    }

    #[test]
    fn len_tracks_allocations_and_releases() {
        let mut pool = pool(nz!(2), GrowthPolicy::Double);
        assert_eq!(pool.len(), 0);

        let blocks: Vec<_> = (0..5).map(|_| pool.allocate().unwrap()).collect();
        assert_eq!(pool.len(), 5);
        assert!(pool.capacity() > pool.len());

        for (released, block) in blocks.into_iter().enumerate() {
            pool.release(block);
            assert_eq!(pool.len(), 4 - released);
        }
    }

    #[test]
    fn foreign_block_is_detected() {
        let mut pool_a = pool(nz!(4), GrowthPolicy::Double);
        let mut pool_b = pool(nz!(4), GrowthPolicy::Double);

        let block = pool_a.allocate().unwrap();
        let _other = pool_b.allocate().unwrap();

        assert_eq!(pool_b.try_release(block), Err(Error::ForeignBlock));
        assert_eq!(pool_b.len(), 1);

        pool_a.release(block);
    }

    #[test]
    #[should_panic]
    fn release_panics_on_double_release() {
        let mut pool = pool(nz!(4), GrowthPolicy::Double);

        let _keep = pool.allocate().unwrap();
        let block = pool.allocate().unwrap();

        pool.release(block);
        pool.release(block);
    }

    #[test]
    fn out_of_memory_leaves_pool_unchanged() {
        let mut pool = PagedPool::new(1 << 62, nz!(1), GrowthPolicy::Double).unwrap();

        let result = pool.allocate();

        assert!(matches!(result, Err(Error::OutOfMemory { .. })));
        assert_eq!(pool.page_count(), 0);
        assert_eq!(pool.capacity(), 0);
        assert!(pool.is_empty());
        pool.integrity_check();
    }

    #[test]
    fn oversized_page_is_capacity_overflow() {
        let mut pool = pool(NonZero::new(usize::MAX / 2).unwrap(), GrowthPolicy::Double);

        assert_eq!(pool.allocate(), Err(Error::CapacityOverflow));
        assert_eq!(pool.page_count(), 0);
        pool.integrity_check();
    }

    #[test]
    fn dropping_with_allocated_blocks_is_allowed_by_default() {
        let mut pool = pool(nz!(4), GrowthPolicy::Double);

        let _block = pool.allocate().unwrap();

        drop(pool);
    }

    #[test]
    #[should_panic]
    fn dropping_with_allocated_blocks_panics_when_forbidden() {
        let mut pool = PagedPool::builder()
            .block_size(8)
            .drop_policy(DropPolicy::MustNotDropBlocks)
            .build()
            .unwrap();

        let _block = pool.allocate().unwrap();

        drop(pool);
    }

    #[test]
    fn dropping_empty_pool_is_allowed_when_forbidden() {
        let mut pool = PagedPool::builder()
            .block_size(8)
            .drop_policy(DropPolicy::MustNotDropBlocks)
            .build()
            .unwrap();

        let block = pool.allocate().unwrap();
        pool.release(block);

        drop(pool);
    }

    #[test]
    fn randomized_interleaving_keeps_invariants() {
        for (seed, growth_policy, retention_policy) in [
            (1, GrowthPolicy::Double, RetentionPolicy::RetainLastPage),
            (2, GrowthPolicy::Triple, RetentionPolicy::RetainLastPage),
            (3, GrowthPolicy::Double, RetentionPolicy::ReleaseEmptyPages),
            (4, GrowthPolicy::Triple, RetentionPolicy::ReleaseEmptyPages),
        ] {
            let mut rng = SmallRng::seed_from_u64(seed);

            let mut pool = PagedPool::builder()
                .block_size(12)
                .blocks_per_page(nz!(3))
                .growth_policy(growth_policy)
                .retention_policy(retention_policy)
                .build()
                .unwrap();

            // Live blocks, keyed by payload address, with the stamp written into each payload.
            let mut live: HashMap<usize, (Block, u64)> = HashMap::new();
            let mut live_order: Vec<usize> = Vec::new();

            for step in 0..2_000_u64 {
                // Bias towards allocation early on and towards release later,
                // so the pool both grows and shrinks.
                let allocate_chance = if step < 1_000 { 0.6 } else { 0.4 };

                if live_order.is_empty() || rng.random_bool(allocate_chance) {
                    let block = pool.allocate().unwrap();
                    let address = block.ptr().as_ptr().addr();

                    unsafe { block.ptr().cast::<u64>().write(step) };

                    assert!(
                        live.insert(address, (block, step)).is_none(),
                        "address {address:#x} handed out twice"
                    );
                    live_order.push(address);
                } else {
                    let position = rng.random_range(0..live_order.len());
                    let address = live_order.swap_remove(position);
                    let (block, stamp) = live.remove(&address).unwrap();

                    assert_eq!(unsafe { block.ptr().cast::<u64>().read() }, stamp);

                    pool.release(block);
                }

                assert_eq!(pool.len(), live.len());
                pool.integrity_check();
            }

            // Iteration visits exactly the live blocks.
            let mut visited: Vec<usize> = pool
                .iter()
                .map(|block| block.ptr().as_ptr().addr())
                .collect();
            visited.sort_unstable();
            live_order.sort_unstable();
            assert_eq!(visited, live_order);

            for address in live_order {
                let (block, _) = live.remove(&address).unwrap();
                pool.release(block);
                pool.integrity_check();
            }

            assert!(pool.is_empty());
        }
    }
}
