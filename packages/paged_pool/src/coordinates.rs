/// Index of a page in the pool's page arena.
///
/// Arena entries are reused after a page is retired, so a `PageId` alone does not identify
/// a page over the lifetime of the pool. Pair it with the page serial for that.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) struct PageId(usize);

impl PageId {
    #[must_use]
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

/// Internal coordinates for locating a block within the pool structure.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) struct BlockCoordinates {
    /// Arena slot of the page containing this block.
    page_id: PageId,

    /// Serial number of the page, unique within the pool. Detects handles that outlived
    /// their page when the arena slot has since been given to a new page.
    page_serial: u64,

    /// Index of the block within its page.
    index_in_page: usize,

    /// Generation of the slot when the block was handed out. Detects handles that outlived
    /// their allocation when the slot has since been given to a new block.
    generation: u16,
}

impl BlockCoordinates {
    #[must_use]
    pub(crate) fn from_parts(
        page_id: PageId,
        page_serial: u64,
        index_in_page: usize,
        generation: u16,
    ) -> Self {
        Self {
            page_id,
            page_serial,
            index_in_page,
            generation,
        }
    }

    #[must_use]
    pub(crate) fn page_id(&self) -> PageId {
        self.page_id
    }

    #[must_use]
    pub(crate) fn page_serial(&self) -> u64 {
        self.page_serial
    }

    #[must_use]
    pub(crate) fn index_in_page(&self) -> usize {
        self.index_in_page
    }

    #[must_use]
    pub(crate) fn generation(&self) -> u16 {
        self.generation
    }
}
