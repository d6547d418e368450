use thiserror::Error;

/// Errors that can occur when working with a [`PagedPool`][crate::PagedPool].
///
/// Only [`Error::OutOfMemory`] and [`Error::CapacityOverflow`] are expected in a correct
/// program. The remaining variants describe a caller handing the pool a [`Block`][crate::Block]
/// that the pool can prove it must not accept.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The memory allocator refused to provide the storage for a new page.
    #[error("out of memory: failed to allocate {bytes} bytes for a new page")]
    OutOfMemory {
        /// Size of the allocation request that failed.
        bytes: usize,
    },

    /// A block or page size calculation exceeded what can be addressed in virtual memory.
    #[error("requested pool or page size exceeds the size of virtual memory")]
    CapacityOverflow,

    /// The block was not allocated from this pool.
    #[error("the block was not allocated from this pool")]
    ForeignBlock,

    /// The block was released at some point in the past and its memory has since been
    /// retired along with its page or handed out again as a new block.
    #[error("the block was released and its memory has since been retired or reused")]
    UseAfterFree,

    /// The block was already released and has not been allocated again since.
    #[error("the block has already been released")]
    DoubleRelease,
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug, Copy);

    #[test]
    fn out_of_memory_reports_size() {
        let error = Error::OutOfMemory { bytes: 4096 };

        assert!(error.to_string().contains("4096"));
    }

    #[test]
    fn contract_violations_are_distinct() {
        assert_ne!(Error::ForeignBlock, Error::UseAfterFree);
        assert_ne!(Error::UseAfterFree, Error::DoubleRelease);
        assert_ne!(Error::DoubleRelease, Error::ForeignBlock);
    }
}
