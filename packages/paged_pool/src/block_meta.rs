/// Free list link value that terminates a page's free list.
const END_OF_FREE_LIST: u32 = u32::MAX;

/// Header stored in front of every block's payload inside a page.
///
/// A free block's header is a link in the page's intrusive free list. An allocated block's
/// header only records that the block is live, which is all a cursor needs to know when
/// skipping over free blocks.
///
/// Both states carry the generation of the slot, which is advanced every time the slot is
/// handed out. A [`Block`][crate::Block] remembers the generation it was allocated with, so a
/// handle that outlived its allocation is told apart from the current occupant of the slot.
/// The generation wraps after 65 536 allocations of the same slot, which makes the check a
/// best-effort one for handles that have been stale for that long.
///
/// The header fits in 8 bytes, so on 64-bit targets it costs exactly one word per block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u16)]
pub(crate) enum BlockMeta {
    /// The block is available and part of its page's free list.
    Free {
        generation: u16,

        /// Index of the next free block in the same page, or [`END_OF_FREE_LIST`].
        next_free: u32,
    },

    /// The block has been handed out and not yet released.
    Allocated { generation: u16 },
}

impl BlockMeta {
    /// Header of a free block whose successor on the free list is `next_free`.
    ///
    /// # Panics
    ///
    /// Panics if `next_free` does not fit in `u32` or equals `u32::MAX`. Pages limit their
    /// block count so that this never happens for a valid index.
    #[must_use]
    pub(crate) fn free(generation: u16, next_free: Option<usize>) -> Self {
        let next_free = next_free.map_or(END_OF_FREE_LIST, |index| {
            u32::try_from(index)
                .ok()
                .filter(|index| *index != END_OF_FREE_LIST)
                .expect("page block count is limited so every index fits the free list link")
        });

        Self::Free {
            generation,
            next_free,
        }
    }

    #[must_use]
    pub(crate) fn is_allocated(self) -> bool {
        matches!(self, Self::Allocated { .. })
    }

    #[must_use]
    pub(crate) fn generation(self) -> u16 {
        match self {
            Self::Free { generation, .. } | Self::Allocated { generation } => generation,
        }
    }

    /// Successor on the free list. Always `None` for an allocated block.
    #[must_use]
    pub(crate) fn next_free(self) -> Option<usize> {
        match self {
            Self::Free { next_free, .. } if next_free != END_OF_FREE_LIST => {
                usize::try_from(next_free).ok()
            }
            _ => None,
        }
    }

    /// Header of the same slot once it is handed out again, with the generation advanced.
    #[must_use]
    pub(crate) fn into_allocated(self) -> Self {
        Self::Allocated {
            generation: self.generation().wrapping_add(1),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[cfg(target_pointer_width = "64")]
    static_assertions::const_assert_eq!(size_of::<BlockMeta>(), size_of::<usize>());

    #[test]
    fn header_fits_in_eight_bytes() {
        assert!(size_of::<BlockMeta>() <= 8);
        assert!(align_of::<BlockMeta>() <= align_of::<usize>());
    }

    #[test]
    fn free_header_round_trips_link() {
        assert_eq!(BlockMeta::free(3, Some(17)).next_free(), Some(17));
        assert_eq!(BlockMeta::free(3, None).next_free(), None);
        assert_eq!(BlockMeta::free(3, Some(17)).generation(), 3);
    }

    #[test]
    fn allocating_advances_generation() {
        let allocated = BlockMeta::free(7, None).into_allocated();

        assert!(allocated.is_allocated());
        assert_eq!(allocated.generation(), 8);
        assert_eq!(allocated.next_free(), None);
    }

    #[test]
    fn generation_wraps() {
        let allocated = BlockMeta::free(u16::MAX, None).into_allocated();

        assert_eq!(allocated.generation(), 0);
    }

    #[test]
    #[should_panic]
    fn link_to_sentinel_index_panics() {
        _ = BlockMeta::free(0, Some(usize::try_from(u32::MAX).unwrap()));
    }
}
