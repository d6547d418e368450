/// Determines whether a pool keeps its last page when that page becomes wholly free.
///
/// Pages that no longer hold any allocated block are normally retired and their memory
/// returned to the system. A pool whose live block count oscillates around zero would then
/// create and destroy its only page over and over again, which this policy can prevent.
///
/// # Examples
///
/// ```
/// use paged_pool::{PagedPool, RetentionPolicy};
///
/// let mut pool = PagedPool::builder()
///     .block_size(8)
///     .retention_policy(RetentionPolicy::ReleaseEmptyPages)
///     .build()
///     .unwrap();
///
/// let block = pool.allocate().unwrap();
/// assert_eq!(pool.page_count(), 1);
///
/// pool.release(block);
/// assert_eq!(pool.page_count(), 0);
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum RetentionPolicy {
    /// Empty pages are retired unless they are the only page of the pool. This is the default.
    #[default]
    RetainLastPage,

    /// Every page is retired as soon as it becomes empty, including the last one.
    ReleaseEmptyPages,
}
