//! Page allocator double shared by the unit tests.

use alloc::alloc::{alloc, dealloc};
use alloc::vec::Vec;
use core::alloc::Layout;

use crate::{PageAllocator, SlabError, SlabResult};

pub(crate) const PAGE_SIZE: usize = 4096;

/// Hands out real pages from the host heap, at most `limit` at a time.
pub(crate) struct MockPageAllocator {
    pub allocated: Vec<usize>,
    pub limit: usize,
    /// Hand out address 0 instead of a real page.
    pub null_pages: bool,
}

impl MockPageAllocator {
    pub fn new(limit: usize) -> Self {
        Self {
            allocated: Vec::new(),
            limit,
            null_pages: false,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(usize::MAX)
    }

    fn layout() -> Layout {
        Layout::from_size_align(PAGE_SIZE, PAGE_SIZE).unwrap()
    }
}

impl PageAllocator for MockPageAllocator {
    fn alloc_page(&mut self) -> SlabResult<usize> {
        if self.null_pages {
            return Ok(0);
        }
        if self.allocated.len() >= self.limit {
            return Err(SlabError::OutOfMemory);
        }
        let addr = unsafe { alloc(Self::layout()) } as usize;
        if addr == 0 {
            return Err(SlabError::OutOfMemory);
        }
        self.allocated.push(addr);
        Ok(addr)
    }

    fn dealloc_page(&mut self, addr: usize) {
        if let Some(idx) = self.allocated.iter().position(|&a| a == addr) {
            self.allocated.swap_remove(idx);
            unsafe { dealloc(addr as *mut u8, Self::layout()) };
        }
    }
}

impl Drop for MockPageAllocator {
    fn drop(&mut self) {
        for addr in self.allocated.drain(..) {
            unsafe { dealloc(addr as *mut u8, Self::layout()) };
        }
    }
}
