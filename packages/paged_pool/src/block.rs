use std::num::NonZero;
use std::ptr::NonNull;

use crate::BlockCoordinates;

/// Handle to one block allocated from a [`PagedPool`][crate::PagedPool].
///
/// The handle acts as the key for returning the block to the pool via
/// [`release()`][crate::PagedPool::release] and supplies a pointer to the block's payload via
/// [`ptr()`](Self::ptr). The payload is [`size()`](Self::size) bytes long, aligned to the
/// machine word, and starts out uninitialized.
///
/// Handles are [`Copy`]: the pool hands out the same handle again from its cursors and
/// iterators. Each handle records the generation of the slot it was allocated from, so the pool
/// can tell a stale handle apart from a newer block that reuses the same memory. Releasing a
/// handle twice, into the wrong pool, or after its memory was retired or handed out again is
/// reported as an [`Error`][crate::Error].
///
/// # Examples
///
/// ```
/// use paged_pool::{GrowthPolicy, PagedPool};
/// use new_zealand::nz;
///
/// let mut pool = PagedPool::new(size_of::<u64>(), nz!(32), GrowthPolicy::Double).unwrap();
///
/// let block = pool.allocate().unwrap();
///
/// // SAFETY: The payload is at least 8 bytes, word-aligned and ours until released.
/// unsafe {
///     block.ptr().cast::<u64>().write(0xfeed_face);
///     assert_eq!(block.ptr().cast::<u64>().read(), 0xfeed_face);
/// }
///
/// pool.release(block);
/// ```
///
/// # Thread safety
///
/// The handle is thread-safe ([`Send`] + [`Sync`]). It only carries the address of the payload;
/// every access through that address already requires `unsafe` code that must uphold the
/// pool's single-owner discipline.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Block {
    /// Ensures this handle can only be returned to the pool it came from.
    pub(crate) pool_id: u64,

    pub(crate) coordinates: BlockCoordinates,

    ptr: NonNull<u8>,

    size: NonZero<usize>,
}

impl Block {
    #[must_use]
    pub(crate) fn new(
        pool_id: u64,
        coordinates: BlockCoordinates,
        ptr: NonNull<u8>,
        size: NonZero<usize>,
    ) -> Self {
        Self {
            pool_id,
            coordinates,
            ptr,
            size,
        }
    }

    /// Returns a pointer to the payload of the block.
    ///
    /// The pointer is valid for reads and writes of [`size()`](Self::size) bytes from the
    /// moment the block is allocated until it is released or the pool is dropped.
    #[must_use]
    #[inline]
    pub fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Returns the payload size of the block in bytes.
    ///
    /// This is the block size of the pool, which may be larger than the size originally
    /// requested because block sizes are rounded up to whole machine words.
    #[must_use]
    #[inline]
    pub fn size(&self) -> usize {
        self.size.get()
    }
}

// SAFETY: The handle is an address and a key. It never dereferences the address itself;
// callers who do must use unsafe code and take responsibility for synchronization.
unsafe impl Send for Block {}

// SAFETY: See above, the handle exposes no shared state through `&Block`.
unsafe impl Sync for Block {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Block: Send, Sync, Copy, std::fmt::Debug, Eq, std::hash::Hash);
}
