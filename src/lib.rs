//! Kernel slab allocator
//!
//! This crate implements a fixed size-class object allocator for small kernel
//! objects, featuring:
//! - Geometric size classes from 16 to 2048 bytes
//! - Per-class occupancy bitmaps over page-backed storage
//! - Lazy page growth and reclamation of emptied pages
//! - A single spin lock serializing every operation
//! - An xv6-style free-list page pool to draw pages from

#![no_std]

extern crate alloc;

// Logging support - conditionally import log crate
#[cfg(feature = "log")]
extern crate log;

// Stub macros when log is disabled - these become no-ops
#[cfg(not(feature = "log"))]
macro_rules! error {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! warn {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! info {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

use core::fmt;

/// Default page size
pub const DEFAULT_PAGE_SIZE: usize = 0x1000;

/// Number of size classes.
pub const NSLAB: usize = 8;

/// Object size of the smallest class. Class `i` serves `MIN_OBJECT_SIZE << i` bytes.
pub const MIN_OBJECT_SIZE: usize = 16;

/// Upper bound on the number of pages a single size class may own.
pub const MAX_PAGES_PER_SLAB: usize = 100;

/// The error type used for slab operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlabError {
    /// Invalid `size` or configuration (e.g. zero-sized request).
    InvalidParam,
    /// Requested size is larger than every configured size class.
    NoSuitableClass,
    /// The page allocator is exhausted, or the class already owns
    /// `MAX_PAGES_PER_SLAB` full pages.
    OutOfMemory,
    /// Bit index outside a bitset's capacity.
    OutOfRange,
    /// `init` has not run yet.
    NotInitialized,
    /// `init` already ran.
    AlreadyInitialized,
}

impl fmt::Display for SlabError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            SlabError::InvalidParam => "invalid parameter",
            SlabError::NoSuitableClass => "no size class large enough",
            SlabError::OutOfMemory => "out of memory",
            SlabError::OutOfRange => "bit index out of range",
            SlabError::NotInitialized => "slab allocator not initialized",
            SlabError::AlreadyInitialized => "slab allocator already initialized",
        };
        f.write_str(msg)
    }
}

/// A [`Result`] type with [`SlabError`] as the error type.
pub type SlabResult<T = ()> = Result<T, SlabError>;

/// Page-granularity allocator the slab draws its backing pages from.
///
/// Pages handed out must be `PAGE_SIZE` bytes long and `PAGE_SIZE`-aligned,
/// where `PAGE_SIZE` is the one the slab allocator is instantiated with.
pub trait PageAllocator {
    /// Allocate one page and return its base address.
    fn alloc_page(&mut self) -> SlabResult<usize>;

    /// Return a page previously obtained from [`alloc_page`](Self::alloc_page).
    fn dealloc_page(&mut self, addr: usize);
}

impl<P: PageAllocator + ?Sized> PageAllocator for &mut P {
    fn alloc_page(&mut self) -> SlabResult<usize> {
        (**self).alloc_page()
    }

    fn dealloc_page(&mut self, addr: usize) {
        (**self).dealloc_page(addr)
    }
}

#[inline]
const fn align_down(pos: usize, align: usize) -> usize {
    pos & !(align - 1)
}

#[inline]
const fn align_up(pos: usize, align: usize) -> usize {
    (pos + align - 1) & !(align - 1)
}

/// Checks whether the address has the demanded alignment.
///
/// Equivalent to `addr % align == 0`, but the alignment must be a power of two.
#[inline]
const fn is_aligned(base_addr: usize, align: usize) -> bool {
    base_addr & (align - 1) == 0
}

pub mod bitset;
pub use bitset::Bitset;

pub mod page_pool;
pub use page_pool::PagePool;

pub mod slab;
pub use slab::{FreeOutcome, SizeClass, SlabTable};

pub mod stats;
#[cfg(feature = "tracking")]
pub use stats::UsageStats;
pub use stats::{ClassStats, SlabReport};

pub mod slab_allocator;
pub use slab_allocator::SlabAllocator;

#[cfg(test)]
mod mock;
