//! Free-list page pool.
//!
//! Hands out single pages carved from memory regions given to it with
//! [`PagePool::add_memory`]. Every free page stores the address of the next
//! free page in its first word, so the pool needs no memory of its own.

#[cfg(feature = "log")]
use log::{debug, error};

use crate::{PageAllocator, SlabError, SlabResult, DEFAULT_PAGE_SIZE};

/// Maximum number of memory regions a pool can manage
pub const MAX_REGIONS: usize = 8;

/// Byte written over pages as they are freed, to catch dangling references.
const FREE_JUNK: u8 = 0x01;
/// Byte written over pages as they are handed out.
const ALLOC_JUNK: u8 = 0x05;

#[derive(Debug, Clone, Copy)]
struct Region {
    start: usize,
    end: usize,
}

pub struct PagePool<const PAGE_SIZE: usize = DEFAULT_PAGE_SIZE> {
    head: Option<usize>,
    regions: [Region; MAX_REGIONS],
    region_count: usize,
    total_pages: usize,
    free_pages: usize,
}

impl<const PAGE_SIZE: usize> PagePool<PAGE_SIZE> {
    pub const fn new() -> Self {
        Self {
            head: None,
            regions: [Region { start: 0, end: 0 }; MAX_REGIONS],
            region_count: 0,
            total_pages: 0,
            free_pages: 0,
        }
    }

    /// Add the pages inside `[start, start + size)` to the pool.
    ///
    /// Partial pages at either end are left out. A region whose first page is
    /// address 0 is rejected.
    ///
    /// # Safety
    /// The memory range must be valid, writable, and exclusively owned by the
    /// pool from now on.
    pub unsafe fn add_memory(&mut self, start: usize, size: usize) -> SlabResult {
        let end = start.checked_add(size).ok_or(SlabError::InvalidParam)?;
        let end = crate::align_down(end, PAGE_SIZE);
        let start = crate::align_up(start, PAGE_SIZE);
        if start >= end {
            return Err(SlabError::InvalidParam);
        }
        // Address 0 terminates the free list
        if start == 0 {
            error!("page pool: region [{:#x}, {:#x}) contains page 0", start, end);
            return Err(SlabError::InvalidParam);
        }
        if self.region_count >= MAX_REGIONS {
            error!(
                "page pool: too many regions, dropping [{:#x}, {:#x})",
                start, end
            );
            return Err(SlabError::InvalidParam);
        }
        let overlaps = self.regions[..self.region_count]
            .iter()
            .any(|r| start < r.end && r.start < end);
        if overlaps {
            return Err(SlabError::InvalidParam);
        }

        self.regions[self.region_count] = Region { start, end };
        self.region_count += 1;

        // Push in reverse so pages come out in ascending address order
        let mut page = end;
        while page > start {
            page -= PAGE_SIZE;
            unsafe { self.push(page) };
        }
        self.total_pages += (end - start) / PAGE_SIZE;
        debug!(
            "page pool: added [{:#x}, {:#x}), {} pages",
            start,
            end,
            (end - start) / PAGE_SIZE
        );
        Ok(())
    }

    unsafe fn push(&mut self, page: usize) {
        unsafe {
            core::ptr::write_bytes(page as *mut u8, FREE_JUNK, PAGE_SIZE);
            (page as *mut usize).write(self.head.unwrap_or(0));
        }
        self.head = Some(page);
        self.free_pages += 1;
    }

    fn owns(&self, addr: usize) -> bool {
        self.regions[..self.region_count]
            .iter()
            .any(|r| addr >= r.start && addr < r.end)
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    pub fn free_pages(&self) -> usize {
        self.free_pages
    }

    pub fn used_pages(&self) -> usize {
        self.total_pages - self.free_pages
    }
}

impl<const PAGE_SIZE: usize> Default for PagePool<PAGE_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const PAGE_SIZE: usize> PageAllocator for PagePool<PAGE_SIZE> {
    fn alloc_page(&mut self) -> SlabResult<usize> {
        let page = self.head.ok_or(SlabError::OutOfMemory)?;
        // SAFETY: every page on the list is one of ours and holds the next link
        let next = unsafe { (page as *const usize).read() };
        self.head = if next == 0 { None } else { Some(next) };
        self.free_pages -= 1;
        unsafe { core::ptr::write_bytes(page as *mut u8, ALLOC_JUNK, PAGE_SIZE) };
        Ok(page)
    }

    fn dealloc_page(&mut self, addr: usize) {
        if !crate::is_aligned(addr, PAGE_SIZE) || !self.owns(addr) {
            error!("page pool: refusing to free foreign page {:#x}", addr);
            return;
        }
        // SAFETY: the page lies in one of our regions
        unsafe { self.push(addr) };
    }
}
