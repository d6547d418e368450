/// Determines what happens when a pool is dropped while blocks are still allocated.
///
/// The pool never owns the values callers place in block payloads, so dropping a pool
/// only ever releases raw memory. This policy decides whether doing so while blocks
/// are outstanding is acceptable.
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
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The pool releases its pages even if some blocks are still allocated. This is the default.
    #[default]
    MayDropBlocks,

    /// The pool will panic if it still has allocated blocks when it is dropped.
    ///
    /// This may be valuable if out of band pointers into the blocks exist and the owner
    /// wants to be told when such pointers could outlive the memory they point to.
    MustNotDropBlocks,
}
