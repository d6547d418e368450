#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A pool of fixed-size memory blocks that grows and shrinks in whole pages.
//!
//! This crate provides [`PagedPool`], an allocator for many same-sized blocks of raw memory.
//! Instead of asking the global allocator for every block, the pool obtains large pages and
//! hands out their blocks one at a time, making both allocation and release O(1).
//!
//! # Key Features
//!
//! - **Fixed-size blocks**: Every block has the same word-aligned payload size, chosen when the
//!   pool is created
//! - **Stable memory addresses**: Blocks never move once allocated
//! - **Page-based growth**: New pages are sized from the existing capacity according to a
//!   [`GrowthPolicy`]
//! - **Page retirement**: Pages whose blocks have all been released are returned to the system,
//!   subject to a [`RetentionPolicy`]
//! - **Misuse detection**: Releasing a block twice, into the wrong pool or through a stale
//!   handle whose memory was since retired or reused is reported as an [`Error`] instead of
//!   corrupting the pool
//! - **Ordered traversal**: A bidirectional [`Cursor`] and a double-ended [`Blocks`] iterator
//!   visit the allocated blocks in page creation order
//! - **Thread mobility**: The pool can be moved between threads (but not shared without
//!   synchronization)
//!
//! The pool only manages memory. It never reads or writes block payloads and never drops any
//! value a caller stores in them.
//!
//! # Examples
//!
//! ## Basic usage
//!
//! ```rust
//! use paged_pool::{GrowthPolicy, PagedPool};
//! use new_zealand::nz;
//!
//! let mut pool = PagedPool::new(size_of::<u64>(), nz!(64), GrowthPolicy::Double).unwrap();
//!
//! let block = pool.allocate().unwrap();
//!
//! // SAFETY: The payload is word-aligned, large enough for a u64 and ours until released.
//! unsafe {
//!     block.ptr().cast::<u64>().write(42);
//!     assert_eq!(block.ptr().cast::<u64>().read(), 42);
//! }
//!
//! pool.release(block);
//! ```
//!
//! ## Detecting misuse
//!
//! ```rust
//! use paged_pool::{Error, PagedPool};
//!
//! let mut pool = PagedPool::builder().block_size(16).build().unwrap();
//! let mut other_pool = PagedPool::builder().block_size(16).build().unwrap();
//!
//! let block = pool.allocate().unwrap();
//!
//! assert_eq!(other_pool.try_release(block), Err(Error::ForeignBlock));
//! assert_eq!(pool.try_release(block), Ok(()));
//! ```
//!
//! ## Walking allocated blocks
//!
//! ```rust
//! use paged_pool::{GrowthPolicy, PagedPool};
//! use new_zealand::nz;
//!
//! let mut pool = PagedPool::new(8, nz!(2), GrowthPolicy::Double).unwrap();
//!
//! let blocks: Vec<_> = (0..5).map(|_| pool.allocate().unwrap()).collect();
//! pool.release(blocks[1]);
//!
//! assert_eq!(pool.iter().count(), 4);
//! assert_eq!(pool.iter().next_back(), Some(blocks[4]));
//! ```

mod block;
mod block_meta;
mod builder;
mod coordinates;
mod cursor;
mod drop_policy;
mod dump;
mod error;
mod growth_policy;
mod page;
mod pool;
mod retention_policy;
mod slot_layout;

pub use block::Block;
pub(crate) use block_meta::*;
pub use builder::*;
pub(crate) use coordinates::*;
pub use cursor::{Blocks, Cursor};
pub use drop_policy::*;
pub(crate) use dump::*;
pub use error::{Error, Result};
pub use growth_policy::*;
pub(crate) use page::*;
pub use pool::PagedPool;
pub(crate) use pool::DEFAULT_BLOCKS_PER_PAGE;
pub use retention_policy::*;
pub(crate) use slot_layout::*;
