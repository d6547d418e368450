use std::alloc::Layout;
use std::num::NonZero;

use crate::{BlockMeta, Error, Result};

/// Size and alignment of a machine word. Block payloads are sized in whole words and
/// start on a word boundary.
pub(crate) const WORD_SIZE: usize = size_of::<usize>();

/// Precalculates the memory layout of one slot (block header plus payload) for a pool.
///
/// Every page of a pool uses the same slot layout and differs only in how many slots
/// it contains.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct SlotLayout {
    /// Payload size of a block, already rounded to a whole number of words.
    block_size: NonZero<usize>,

    /// Memory layout of a single slot, consisting of the block header and the payload,
    /// including any padding. The size of this layout is the stride between consecutive
    /// slots in a page's storage.
    slot_layout: Layout,

    /// Byte offset from the start of a slot to the payload of the block in that slot.
    slot_to_payload_offset: usize,
}

impl SlotLayout {
    /// Calculates the slot layout for blocks with a payload of (at least) `requested_size` bytes.
    ///
    /// The payload size is rounded up to the word size, with a minimum of one word.
    pub(crate) fn new(requested_size: usize) -> Result<Self> {
        let block_size = round_to_word(requested_size)?;

        let payload_layout = Layout::from_size_align(block_size.get(), WORD_SIZE)
            .map_err(|_layout_error| Error::CapacityOverflow)?;

        let (slot_layout, slot_to_payload_offset) = Layout::new::<BlockMeta>()
            .extend(payload_layout)
            .map_err(|_layout_error| Error::CapacityOverflow)?;

        // Layout::pad_to_align() ensures the size is a multiple of alignment,
        // which is exactly what we need for proper array element spacing.
        let slot_layout = slot_layout.pad_to_align();

        Ok(Self {
            block_size,
            slot_layout,
            slot_to_payload_offset,
        })
    }

    #[must_use]
    pub(crate) fn block_size(&self) -> NonZero<usize> {
        self.block_size
    }

    /// Distance in bytes between the starts of two consecutive slots.
    #[must_use]
    pub(crate) fn stride(&self) -> usize {
        self.slot_layout.size()
    }

    #[must_use]
    pub(crate) fn slot_to_payload_offset(&self) -> usize {
        self.slot_to_payload_offset
    }

    /// Calculates the layout of the storage of a page holding `block_count` slots.
    pub(crate) fn page_storage_layout(&self, block_count: NonZero<usize>) -> Result<Layout> {
        // We cannot use Layout::array() because that requires us to name a type.
        let total_size = self
            .stride()
            .checked_mul(block_count.get())
            .ok_or(Error::CapacityOverflow)?;

        Layout::from_size_align(total_size, self.slot_layout.align())
            .map_err(|_layout_error| Error::CapacityOverflow)
    }
}

/// Rounds a requested block size up to the next multiple of the word size,
/// treating anything smaller than a word as one word.
fn round_to_word(requested_size: usize) -> Result<NonZero<usize>> {
    let rounded = requested_size
        .max(WORD_SIZE)
        .checked_next_multiple_of(WORD_SIZE)
        .ok_or(Error::CapacityOverflow)?;

    NonZero::new(rounded).ok_or(Error::CapacityOverflow)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;

    use super::*;

    #[test]
    fn block_size_rounds_up_to_word() {
        assert_eq!(SlotLayout::new(0).unwrap().block_size().get(), WORD_SIZE);
        assert_eq!(SlotLayout::new(1).unwrap().block_size().get(), WORD_SIZE);
        assert_eq!(
            SlotLayout::new(WORD_SIZE).unwrap().block_size().get(),
            WORD_SIZE
        );
        assert_eq!(
            SlotLayout::new(WORD_SIZE + 1).unwrap().block_size().get(),
            WORD_SIZE * 2
        );
        assert_eq!(SlotLayout::new(17).unwrap().block_size().get() % WORD_SIZE, 0);
    }

    #[test]
    fn payload_is_word_aligned_and_follows_header() {
        let layout = SlotLayout::new(24).unwrap();

        assert!(layout.slot_to_payload_offset() >= size_of::<BlockMeta>());
        assert_eq!(layout.slot_to_payload_offset() % WORD_SIZE, 0);
        assert_eq!(layout.stride() % WORD_SIZE, 0);
        assert!(layout.stride() >= layout.slot_to_payload_offset() + 24);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn header_costs_one_word_per_block() {
        let layout = SlotLayout::new(24).unwrap();

        assert_eq!(layout.slot_to_payload_offset(), WORD_SIZE);
        assert_eq!(layout.stride(), WORD_SIZE + 24);
    }

    #[test]
    fn page_storage_is_stride_times_count() {
        let layout = SlotLayout::new(16).unwrap();
        let storage = layout.page_storage_layout(nz!(10)).unwrap();

        assert_eq!(storage.size(), layout.stride() * 10);
    }

    #[test]
    fn oversized_block_is_capacity_overflow() {
        assert_eq!(SlotLayout::new(usize::MAX), Err(Error::CapacityOverflow));
    }

    #[test]
    fn oversized_page_is_capacity_overflow() {
        let layout = SlotLayout::new(16).unwrap();

        assert_eq!(
            layout.page_storage_layout(NonZero::new(usize::MAX / 2).unwrap()),
            Err(Error::CapacityOverflow)
        );
    }
}
