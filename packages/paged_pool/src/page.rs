use std::alloc::{Layout, alloc, dealloc};
use std::num::NonZero;
use std::ptr::NonNull;

use crate::{BlockMeta, Error, PageId, Result, SlotLayout};

/// One contiguous memory region holding a fixed number of same-sized blocks.
///
/// Each slot of the region starts with a [`BlockMeta`] header, followed by the block payload
/// at the offset given by the pool's [`SlotLayout`]. Free blocks form an intrusive singly-linked
/// list through their headers, so taking and returning a block is O(1).
///
/// The page also carries its links in the two pool-wide page lists. The page never follows
/// these links itself, it only stores them on behalf of the pool.
///
/// # Out of band access
///
/// The page does not create or keep references to block payloads, so it is valid to access
/// payloads via pointers even when not holding a reference to the page.
#[derive(Debug)]
pub(crate) struct Page {
    /// Pool-unique identity of this page, used to reject handles to retired pages whose
    /// arena slot has been reused.
    serial: u64,

    /// Number of blocks in the page.
    block_count: NonZero<usize>,

    /// Number of blocks currently on the free list.
    free_count: usize,

    /// Head of the intrusive free list. `None` when every block is allocated.
    free_first: Option<usize>,

    slot_layout: SlotLayout,

    /// Layout of the whole allocation, needed again to release it.
    storage_layout: Layout,

    /// Start of the allocation, which is also the header of the first slot.
    first_slot_ptr: NonNull<BlockMeta>,

    links: PageLinks,
}

/// Links of a page in the pool-wide page lists.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct PageLinks {
    /// Previous (older) page in creation order.
    pub(crate) prev: Option<PageId>,

    /// Next (newer) page in creation order.
    pub(crate) next: Option<PageId>,

    /// Previous page in the list of pages with free blocks.
    pub(crate) prev_free: Option<PageId>,

    /// Next page in the list of pages with free blocks.
    pub(crate) next_free: Option<PageId>,
}

impl Page {
    /// Allocates the storage of a new page and threads all of its blocks onto the free list,
    /// in ascending order.
    ///
    /// Fails without side effects if the storage cannot be allocated, or with
    /// [`Error::CapacityOverflow`] if the block count does not fit the `u32` free list links.
    pub(crate) fn new(
        serial: u64,
        slot_layout: SlotLayout,
        block_count: NonZero<usize>,
    ) -> Result<Self> {
        if u32::try_from(block_count.get()).is_err() {
            return Err(Error::CapacityOverflow);
        }

        let storage_layout = slot_layout.page_storage_layout(block_count)?;

        // SAFETY: The layout has a non-zero size because both the stride
        // and the block count are non-zero.
        let first_slot_ptr = NonNull::new(unsafe { alloc(storage_layout) })
            .ok_or(Error::OutOfMemory {
                bytes: storage_layout.size(),
            })?
            .cast::<BlockMeta>();

        for index in 0..block_count.get() {
            let next_free = index
                .checked_add(1)
                .filter(|next| *next < block_count.get());

            // Cannot overflow because the offset is inside the allocation we just made.
            let offset = index.wrapping_mul(slot_layout.stride());

            // SAFETY: The offset is within the allocation and every slot starts at a multiple
            // of the stride, which is a multiple of the header alignment.
            unsafe {
                first_slot_ptr
                    .byte_add(offset)
                    .write(BlockMeta::free(0, next_free));
            }
        }

        Ok(Self {
            serial,
            block_count,
            free_count: block_count.get(),
            free_first: Some(0),
            slot_layout,
            storage_layout,
            first_slot_ptr,
            links: PageLinks::default(),
        })
    }

    #[must_use]
    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    #[must_use]
    pub(crate) fn block_count(&self) -> usize {
        self.block_count.get()
    }

    #[must_use]
    pub(crate) fn free_count(&self) -> usize {
        self.free_count
    }

    /// Whether every block of the page is allocated.
    #[must_use]
    pub(crate) fn is_full(&self) -> bool {
        self.free_count == 0
    }

    /// Whether no block of the page is allocated.
    #[must_use]
    pub(crate) fn is_unused(&self) -> bool {
        self.free_count == self.block_count.get()
    }

    #[must_use]
    pub(crate) fn links(&self) -> PageLinks {
        self.links
    }

    pub(crate) fn links_mut(&mut self) -> &mut PageLinks {
        &mut self.links
    }

    fn meta_ptr(&self, index: usize) -> NonNull<BlockMeta> {
        assert!(
            index < self.block_count.get(),
            "block {index} index out of bounds in page of {} blocks",
            self.block_count
        );

        // Guarded by the bounds check above. This cannot overflow because that would imply
        // the page extends beyond virtual memory.
        let offset = index.wrapping_mul(self.slot_layout.stride());

        // SAFETY: The offset is within our allocation due to the bounds check above.
        unsafe { self.first_slot_ptr.byte_add(offset) }
    }

    fn meta(&self, index: usize) -> BlockMeta {
        // SAFETY: Every header was initialized in new() and is only ever overwritten
        // with another valid header.
        unsafe { self.meta_ptr(index).read() }
    }

    #[allow(
        clippy::needless_pass_by_ref_mut,
        reason = "writes through the storage pointer, which needs exclusive access"
    )]
    fn set_meta(&mut self, index: usize, meta: BlockMeta) {
        // SAFETY: The pointer is in bounds and we hold the page exclusively. BlockMeta is Copy,
        // so overwriting the previous header without dropping it is fine.
        unsafe { self.meta_ptr(index).write(meta) };
    }

    /// Whether the block at `index` is currently allocated.
    #[must_use]
    pub(crate) fn is_allocated(&self, index: usize) -> bool {
        self.meta(index).is_allocated()
    }

    /// Generation of the slot at `index`, as recorded when it was last handed out.
    #[must_use]
    pub(crate) fn generation(&self, index: usize) -> u16 {
        self.meta(index).generation()
    }

    /// Whether the block at `index` is allocated and was handed out as `generation`.
    #[must_use]
    pub(crate) fn is_live(&self, index: usize, generation: u16) -> bool {
        index < self.block_count.get()
            && self.meta(index) == (BlockMeta::Allocated { generation })
    }

    /// Returns a pointer to the payload of the block at `index`.
    #[must_use]
    pub(crate) fn payload_ptr(&self, index: usize) -> NonNull<u8> {
        // SAFETY: The slot is in bounds (checked by meta_ptr) and the payload offset was
        // calculated by SlotLayout to lie within the slot.
        unsafe {
            self.meta_ptr(index)
                .byte_add(self.slot_layout.slot_to_payload_offset())
                .cast::<u8>()
        }
    }

    /// Takes the first block off the free list and marks it allocated, advancing the
    /// generation of its slot.
    ///
    /// Returns `None` if the page is full.
    pub(crate) fn pop_free(&mut self) -> Option<usize> {
        let index = self.free_first?;

        let meta = self.meta(index);
        assert!(
            !meta.is_allocated(),
            "free list of page {} leads to allocated block {index}",
            self.serial
        );

        self.set_meta(index, meta.into_allocated());
        self.free_first = meta.next_free();

        // Cannot wrap because the free list was not empty.
        self.free_count = self.free_count.wrapping_sub(1);

        Some(index)
    }

    /// Returns an allocated block to the front of the free list.
    ///
    /// `generation` is the generation the caller's handle was allocated with. A free slot
    /// is a [`Error::DoubleRelease`], an allocated slot of another generation belongs to a
    /// newer block and is a [`Error::UseAfterFree`].
    pub(crate) fn push_free(&mut self, index: usize, generation: u16) -> Result<()> {
        if index >= self.block_count.get() {
            return Err(Error::ForeignBlock);
        }

        match self.meta(index) {
            BlockMeta::Free { .. } => return Err(Error::DoubleRelease),
            BlockMeta::Allocated {
                generation: current,
            } if current != generation => return Err(Error::UseAfterFree),
            BlockMeta::Allocated { .. } => {}
        }

        self.set_meta(index, BlockMeta::free(generation, self.free_first));
        self.free_first = Some(index);

        // Cannot overflow because the block was allocated, so free_count < block_count.
        self.free_count = self.free_count.wrapping_add(1);

        Ok(())
    }

    /// Finds the first allocated block at or after `start`.
    #[must_use]
    pub(crate) fn first_allocated_from(&self, start: usize) -> Option<usize> {
        (start..self.block_count.get()).find(|index| self.is_allocated(*index))
    }

    /// Finds the last allocated block at or before `start`.
    #[must_use]
    pub(crate) fn last_allocated_until(&self, start: usize) -> Option<usize> {
        let end = start.min(self.block_count.get().wrapping_sub(1));

        (0..=end).rev().find(|index| self.is_allocated(*index))
    }

    /// Renders the page as one character per block, `#` for allocated and `.` for free.
    #[must_use]
    pub(crate) fn occupancy_map(&self) -> String {
        (0..self.block_count.get())
            .map(|index| if self.is_allocated(index) { '#' } else { '.' })
            .collect()
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(test)]
    pub(crate) fn integrity_check(&self) {
        let mut visited = vec![false; self.block_count.get()];
        let mut chain_length: usize = 0;
        let mut cursor = self.free_first;

        while let Some(index) = cursor {
            assert!(
                index < self.block_count.get(),
                "free list of page {} leads out of bounds to {index}",
                self.serial
            );
            assert!(
                !visited[index],
                "free list of page {} has a cycle through block {index}",
                self.serial
            );
            visited[index] = true;
            chain_length += 1;

            let meta = self.meta(index);
            assert!(
                !meta.is_allocated(),
                "free list of page {} leads to allocated block {index}",
                self.serial
            );
            cursor = meta.next_free();
        }

        assert_eq!(
            chain_length, self.free_count,
            "free list length of page {} does not match its free count",
            self.serial
        );

        let observed_free = (0..self.block_count.get())
            .filter(|index| !self.is_allocated(*index))
            .count();

        assert_eq!(
            observed_free, self.free_count,
            "page {} has free blocks that are not on its free list",
            self.serial
        );
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        // SAFETY: We allocated this memory with exactly this layout in new() and nothing
        // else releases it. Headers are Copy, so no per-slot cleanup is required.
        unsafe {
            dealloc(self.first_slot_ptr.as_ptr().cast(), self.storage_layout);
        }
    }
}

// SAFETY: The page exclusively owns its storage. The raw pointer is only used to reach that
// storage, and all access to the page itself is governed by the borrow checker.
unsafe impl Send for Page {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::WORD_SIZE;

    assert_impl_all!(Page: Send);
    assert_not_impl_any!(Page: Sync);

    fn page(block_count: NonZero<usize>) -> Page {
        Page::new(1, SlotLayout::new(16).unwrap(), block_count).unwrap()
    }

    fn release(page: &mut Page, index: usize) -> Result<()> {
        let generation = page.generation(index);
        page.push_free(index, generation)
    }

    #[test]
    fn new_page_is_entirely_free() {
        let page = page(nz!(4));

        assert_eq!(page.block_count(), 4);
        assert_eq!(page.free_count(), 4);
        assert!(page.is_unused());
        assert!(!page.is_full());
        assert_eq!(page.occupancy_map(), "....");
        page.integrity_check();
    }

    #[test]
    fn blocks_are_handed_out_in_ascending_order() {
        let mut page = page(nz!(3));

        assert_eq!(page.pop_free(), Some(0));
        assert_eq!(page.pop_free(), Some(1));
        assert_eq!(page.pop_free(), Some(2));
        assert_eq!(page.pop_free(), None);

        assert!(page.is_full());
        assert_eq!(page.occupancy_map(), "###");
        page.integrity_check();
    }

    #[test]
    fn released_blocks_are_reused_last_in_first_out() {
        let mut page = page(nz!(4));

        for _ in 0..4 {
            page.pop_free().unwrap();
        }

        release(&mut page, 1).unwrap();
        release(&mut page, 3).unwrap();
        page.integrity_check();

        assert_eq!(page.free_count(), 2);
        assert_eq!(page.occupancy_map(), "#.#.");

        assert_eq!(page.pop_free(), Some(3));
        assert_eq!(page.pop_free(), Some(1));
        assert_eq!(page.pop_free(), None);
    }

    #[test]
    fn double_release_is_detected() {
        let mut page = page(nz!(2));

        let index = page.pop_free().unwrap();
        let generation = page.generation(index);
        page.push_free(index, generation).unwrap();

        assert_eq!(page.push_free(index, generation), Err(Error::DoubleRelease));
        assert_eq!(page.free_count(), 2);
        page.integrity_check();
    }

    #[test]
    fn out_of_range_release_is_foreign() {
        let mut page = page(nz!(2));

        assert_eq!(page.push_free(2, 1), Err(Error::ForeignBlock));
    }

    #[test]
    fn reused_slot_rejects_previous_generation() {
        let mut page = page(nz!(2));

        let index = page.pop_free().unwrap();
        let old_generation = page.generation(index);
        page.push_free(index, old_generation).unwrap();

        assert_eq!(page.pop_free(), Some(index));
        let new_generation = page.generation(index);
        assert_ne!(new_generation, old_generation);

        assert_eq!(
            page.push_free(index, old_generation),
            Err(Error::UseAfterFree)
        );
        assert!(page.is_allocated(index));
        assert!(!page.is_live(index, old_generation));
        assert!(page.is_live(index, new_generation));
        assert_eq!(page.free_count(), 1);
        page.integrity_check();

        page.push_free(index, new_generation).unwrap();
        assert!(!page.is_live(index, new_generation));
    }

    #[test]
    fn generation_survives_while_free() {
        let mut page = page(nz!(1));

        let index = page.pop_free().unwrap();
        let generation = page.generation(index);
        page.push_free(index, generation).unwrap();

        assert_eq!(page.generation(index), generation);
        page.pop_free().unwrap();
        assert_eq!(page.generation(index), generation.wrapping_add(1));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn block_count_beyond_link_range_is_capacity_overflow() {
        let layout = SlotLayout::new(8).unwrap();
        let block_count = NonZero::new(usize::try_from(u32::MAX).unwrap() + 1).unwrap();

        assert!(matches!(
            Page::new(1, layout, block_count),
            Err(Error::CapacityOverflow)
        ));
    }

    #[test]
    fn payloads_are_aligned_and_one_stride_apart() {
        let layout = SlotLayout::new(16).unwrap();
        let page = Page::new(1, layout, nz!(3)).unwrap();

        let first = page.payload_ptr(0).as_ptr().addr();
        let second = page.payload_ptr(1).as_ptr().addr();
        let third = page.payload_ptr(2).as_ptr().addr();

        assert_eq!(first % WORD_SIZE, 0);
        assert_eq!(second - first, layout.stride());
        assert_eq!(third - second, layout.stride());
    }

    #[test]
    fn payloads_hold_written_bytes() {
        let mut page = page(nz!(2));

        let a = page.pop_free().unwrap();
        let b = page.pop_free().unwrap();

        unsafe {
            page.payload_ptr(a).cast::<[u8; 16]>().write([0xAA; 16]);
            page.payload_ptr(b).cast::<[u8; 16]>().write([0xBB; 16]);

            assert_eq!(page.payload_ptr(a).cast::<[u8; 16]>().read(), [0xAA; 16]);
            assert_eq!(page.payload_ptr(b).cast::<[u8; 16]>().read(), [0xBB; 16]);
        }

        // Writing payloads must not disturb the headers.
        page.integrity_check();
    }

    #[test]
    fn allocated_scan_skips_free_blocks() {
        let mut page = page(nz!(5));

        for _ in 0..5 {
            page.pop_free().unwrap();
        }
        release(&mut page, 0).unwrap();
        release(&mut page, 2).unwrap();
        release(&mut page, 4).unwrap();

        assert_eq!(page.first_allocated_from(0), Some(1));
        assert_eq!(page.first_allocated_from(2), Some(3));
        assert_eq!(page.first_allocated_from(4), None);
        assert_eq!(page.first_allocated_from(5), None);

        assert_eq!(page.last_allocated_until(4), Some(3));
        assert_eq!(page.last_allocated_until(2), Some(1));
        assert_eq!(page.last_allocated_until(0), None);
        assert_eq!(page.last_allocated_until(usize::MAX), Some(3));
    }

    #[test]
    fn unsatisfiable_page_is_out_of_memory() {
        // No system can provide 2^62 bytes of memory.
        let layout = SlotLayout::new(1 << 62).unwrap();

        let result = Page::new(1, layout, nz!(1));

        assert!(matches!(result, Err(Error::OutOfMemory { .. })));
    }

    #[test]
    fn drop_with_allocated_blocks_releases_storage() {
        let mut page = page(nz!(8));

        page.pop_free().unwrap();
        page.pop_free().unwrap();

        drop(page);
    }
}
