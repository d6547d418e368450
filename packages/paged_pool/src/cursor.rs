use std::iter::FusedIterator;

use crate::{Block, PageId, PagedPool};

/// Position of an allocated block: the page and the index of the block within it.
type Position = (PageId, usize);

/// A bidirectional cursor over the allocated blocks of a [`PagedPool`].
///
/// The cursor visits blocks in page creation order and, within a page, in address order,
/// skipping free blocks. Once it runs off either end it is exhausted and stays exhausted.
///
/// The cursor borrows the pool, so the pool cannot be modified while a cursor exists.
///
/// # Examples
///
/// ```
/// use paged_pool::PagedPool;
///
/// let mut pool = PagedPool::builder().block_size(8).build().unwrap();
///
/// let a = pool.allocate().unwrap();
/// let b = pool.allocate().unwrap();
/// let c = pool.allocate().unwrap();
///
/// let mut cursor = pool.cursor_at(&b);
/// assert_eq!(cursor.current(), Some(b));
/// assert_eq!(cursor.move_prev(), Some(a));
/// assert_eq!(cursor.move_prev(), None);
/// assert!(cursor.is_exhausted());
///
/// let (mut cursor, last) = pool.last().unwrap();
/// assert_eq!(last, c);
/// assert_eq!(cursor.move_next(), None);
/// ```
#[derive(Clone, Debug)]
pub struct Cursor<'p> {
    pool: &'p PagedPool,

    /// `None` once the cursor is exhausted.
    position: Option<Position>,
}

impl<'p> Cursor<'p> {
    pub(crate) fn first(pool: &'p PagedPool) -> Option<(Self, Block)> {
        let position = first_from_page(pool, pool.first_page_id())?;
        Some((Self::at(pool, position.0, position.1), block_at(pool, position)))
    }

    pub(crate) fn last(pool: &'p PagedPool) -> Option<(Self, Block)> {
        let position = last_from_page(pool, pool.last_page_id())?;
        Some((Self::at(pool, position.0, position.1), block_at(pool, position)))
    }

    pub(crate) fn at(pool: &'p PagedPool, page_id: PageId, index: usize) -> Self {
        Self {
            pool,
            position: Some((page_id, index)),
        }
    }

    /// Moves to the next allocated block and returns it.
    ///
    /// Returns `None` and exhausts the cursor if there is no next block.
    pub fn move_next(&mut self) -> Option<Block> {
        self.position = self.position.and_then(|position| next_after(self.pool, position));
        self.current()
    }

    /// Moves to the previous allocated block and returns it.
    ///
    /// Returns `None` and exhausts the cursor if there is no previous block.
    pub fn move_prev(&mut self) -> Option<Block> {
        self.position = self
            .position
            .and_then(|position| prev_before(self.pool, position));
        self.current()
    }

    /// The block under the cursor, or `None` if the cursor is exhausted.
    #[must_use]
    pub fn current(&self) -> Option<Block> {
        self.position.map(|position| block_at(self.pool, position))
    }

    /// Whether the cursor has moved past either end of the pool.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.position.is_none()
    }
}

/// Iterator over the allocated blocks of a [`PagedPool`], created by
/// [`PagedPool::iter()`].
///
/// Blocks are yielded in page creation order and, within a page, in address order.
/// Iteration from the back yields the same blocks in reverse.
#[derive(Clone, Debug)]
pub struct Blocks<'p> {
    pool: &'p PagedPool,

    /// Next block to yield from the front.
    front: Option<Position>,

    /// Next block to yield from the back.
    back: Option<Position>,

    /// Number of blocks not yet yielded from either end. Once this reaches zero the
    /// front and back positions are meaningless.
    remaining: usize,
}

impl<'p> Blocks<'p> {
    pub(crate) fn new(pool: &'p PagedPool) -> Self {
        Self {
            pool,
            front: first_from_page(pool, pool.first_page_id()),
            back: last_from_page(pool, pool.last_page_id()),
            remaining: pool.len(),
        }
    }
}

impl Iterator for Blocks<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let position = self
            .front
            .expect("iterator has blocks remaining, so there must be a front position");

        // Cannot wrap because we checked for zero above.
        self.remaining = self.remaining.wrapping_sub(1);
        self.front = next_after(self.pool, position);

        Some(block_at(self.pool, position))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl DoubleEndedIterator for Blocks<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let position = self
            .back
            .expect("iterator has blocks remaining, so there must be a back position");

        // Cannot wrap because we checked for zero above.
        self.remaining = self.remaining.wrapping_sub(1);
        self.back = prev_before(self.pool, position);

        Some(block_at(self.pool, position))
    }
}

impl ExactSizeIterator for Blocks<'_> {
    fn len(&self) -> usize {
        self.remaining
    }
}

impl FusedIterator for Blocks<'_> {}

fn block_at(pool: &PagedPool, (page_id, index): Position) -> Block {
    pool.block_at(page_id, index)
}

/// Finds the first allocated block in the given page or any newer page.
fn first_from_page(pool: &PagedPool, mut page_id: Option<PageId>) -> Option<Position> {
    while let Some(current) = page_id {
        let page = pool.page(current);

        if let Some(index) = page.first_allocated_from(0) {
            return Some((current, index));
        }

        page_id = page.links().next;
    }

    None
}

/// Finds the last allocated block in the given page or any older page.
fn last_from_page(pool: &PagedPool, mut page_id: Option<PageId>) -> Option<Position> {
    while let Some(current) = page_id {
        let page = pool.page(current);

        if let Some(index) = page.last_allocated_until(usize::MAX) {
            return Some((current, index));
        }

        page_id = page.links().prev;
    }

    None
}

fn next_after(pool: &PagedPool, (page_id, index): Position) -> Option<Position> {
    let page = pool.page(page_id);

    // Cannot overflow because the index is within a page, which is smaller than memory.
    if let Some(next) = page.first_allocated_from(index.wrapping_add(1)) {
        return Some((page_id, next));
    }

    first_from_page(pool, page.links().next)
}

fn prev_before(pool: &PagedPool, (page_id, index): Position) -> Option<Position> {
    let page = pool.page(page_id);

    if let Some(previous) = index
        .checked_sub(1)
        .and_then(|start| page.last_allocated_until(start))
    {
        return Some((page_id, previous));
    }

    last_from_page(pool, page.links().prev)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use crate::GrowthPolicy;

    use super::*;

    assert_impl_all!(Blocks<'static>: Iterator, DoubleEndedIterator, ExactSizeIterator, FusedIterator);
    assert_not_impl_any!(Cursor<'static>: Send, Sync);

    #[test]
    fn empty_pool_has_no_cursor() {
        let pool = PagedPool::new(8, nz!(4), GrowthPolicy::Double).unwrap();

        assert!(pool.first().is_none());
        assert!(pool.last().is_none());
        assert_eq!(pool.iter().next(), None);
        assert_eq!(pool.iter().len(), 0);
    }

    #[test]
    fn retained_empty_page_has_no_cursor() {
        let mut pool = PagedPool::new(8, nz!(4), GrowthPolicy::Double).unwrap();

        let block = pool.allocate().unwrap();
        pool.release(block);
        assert_eq!(pool.page_count(), 1);

        assert!(pool.first().is_none());
        assert!(pool.last().is_none());
    }

    #[test]
    fn cursor_skips_released_block() {
        let mut pool = PagedPool::new(8, nz!(4), GrowthPolicy::Double).unwrap();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        pool.release(b);

        let (mut cursor, first) = pool.first().unwrap();
        assert_eq!(first, a);
        assert_eq!(cursor.move_next(), Some(c));
        assert_eq!(cursor.move_next(), None);

        let (mut cursor, last) = pool.last().unwrap();
        assert_eq!(last, c);
        assert_eq!(cursor.move_prev(), Some(a));
        assert_eq!(cursor.move_prev(), None);
    }

    #[test]
    fn cursor_crosses_pages_backwards() {
        let mut pool = PagedPool::new(8, nz!(4), GrowthPolicy::Double).unwrap();

        let blocks: Vec<_> = (0..5).map(|_| pool.allocate().unwrap()).collect();
        assert_eq!(pool.page_count(), 2);
        assert_eq!(pool.capacity(), 8);

        pool.release(blocks[2]);

        let mut cursor = pool.cursor_at(&blocks[4]);
        assert_eq!(cursor.move_prev(), Some(blocks[3]));
        assert_eq!(cursor.move_prev(), Some(blocks[1]));
        assert_eq!(cursor.move_prev(), Some(blocks[0]));
        assert_eq!(cursor.move_prev(), None);
    }

    #[test]
    fn cursor_crosses_pages_forwards() {
        let mut pool = PagedPool::new(8, nz!(2), GrowthPolicy::Double).unwrap();

        let blocks: Vec<_> = (0..6).map(|_| pool.allocate().unwrap()).collect();
        assert_eq!(pool.page_count(), 3);

        // Leaves the second page with nothing allocated in its first block.
        pool.release(blocks[1]);
        pool.release(blocks[2]);

        let mut cursor = pool.cursor_at(&blocks[0]);
        assert_eq!(cursor.move_next(), Some(blocks[3]));
        assert_eq!(cursor.move_next(), Some(blocks[4]));
        assert_eq!(cursor.move_next(), Some(blocks[5]));
        assert_eq!(cursor.move_next(), None);
    }

    #[test]
    fn exhausted_cursor_stays_exhausted() {
        let mut pool = PagedPool::new(8, nz!(4), GrowthPolicy::Double).unwrap();

        let a = pool.allocate().unwrap();
        let _b = pool.allocate().unwrap();

        let mut cursor = pool.cursor_at(&a);
        assert!(!cursor.is_exhausted());
        assert_eq!(cursor.move_prev(), None);
        assert!(cursor.is_exhausted());

        assert_eq!(cursor.current(), None);
        assert_eq!(cursor.move_next(), None);
        assert_eq!(cursor.move_prev(), None);
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn cursor_at_released_block_is_rejected() {
        let mut pool = PagedPool::new(8, nz!(4), GrowthPolicy::Double).unwrap();

        let _a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        pool.release(b);

        assert_eq!(
            pool.try_cursor_at(&b).unwrap_err(),
            crate::Error::UseAfterFree
        );
    }

    #[test]
    fn cursor_at_foreign_block_is_rejected() {
        let mut pool_a = PagedPool::new(8, nz!(4), GrowthPolicy::Double).unwrap();
        let pool_b = PagedPool::new(8, nz!(4), GrowthPolicy::Double).unwrap();

        let block = pool_a.allocate().unwrap();

        assert_eq!(
            pool_b.try_cursor_at(&block).unwrap_err(),
            crate::Error::ForeignBlock
        );
    }

    #[test]
    #[should_panic]
    fn cursor_at_panics_on_released_block() {
        let mut pool = PagedPool::new(8, nz!(4), GrowthPolicy::Double).unwrap();

        let _a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        pool.release(b);

        let _cursor = pool.cursor_at(&b);
    }

    #[test]
    fn iterator_matches_cursor_order() {
        let mut pool = PagedPool::new(8, nz!(3), GrowthPolicy::Triple).unwrap();

        let blocks: Vec<_> = (0..12).map(|_| pool.allocate().unwrap()).collect();
        for index in [0, 4, 5, 11] {
            pool.release(blocks[index]);
        }

        let mut via_cursor = Vec::new();
        let (mut cursor, first) = pool.first().unwrap();
        via_cursor.push(first);
        while let Some(block) = cursor.move_next() {
            via_cursor.push(block);
        }

        let via_iter: Vec<_> = pool.iter().collect();

        assert_eq!(via_iter, via_cursor);
        assert_eq!(via_iter.len(), 8);
    }

    #[test]
    fn iterator_meets_in_the_middle() {
        let mut pool = PagedPool::new(8, nz!(2), GrowthPolicy::Double).unwrap();

        let blocks: Vec<_> = (0..5).map(|_| pool.allocate().unwrap()).collect();

        let mut iter = pool.iter();
        assert_eq!(iter.len(), 5);

        assert_eq!(iter.next(), Some(blocks[0]));
        assert_eq!(iter.next_back(), Some(blocks[4]));
        assert_eq!(iter.next(), Some(blocks[1]));
        assert_eq!(iter.next_back(), Some(blocks[3]));
        assert_eq!(iter.len(), 1);
        assert_eq!(iter.next_back(), Some(blocks[2]));

        assert_eq!(iter.len(), 0);
        assert_eq!(iter.next(), None);
        assert_eq!(iter.next_back(), None);
    }

    #[test]
    fn into_iterator_for_reference() {
        let mut pool = PagedPool::new(8, nz!(4), GrowthPolicy::Double).unwrap();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();

        let mut seen = Vec::new();
        for block in &pool {
            seen.push(block);
        }

        assert_eq!(seen, vec![a, b]);
    }
}
