//! Locked slab allocator.
//!
//! This module puts the [`SlabTable`] behind one spin lock and exposes the
//! allocator's public operations. Every operation, including the calls the
//! table makes into the page allocator, runs with the lock held.
//!
//! A kernel typically keeps a single instance in a `static`, calls
//! [`SlabAllocator::init`] once during boot and never tears it down.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

use kspin::SpinNoIrq;

#[cfg(feature = "log")]
use log::{error, info, warn};

use crate::slab::{FreeOutcome, SlabTable};
#[cfg(feature = "tracking")]
use crate::stats::UsageStats;
use crate::stats::{ClassStats, SlabReport};
use crate::{PageAllocator, SlabError, SlabResult, DEFAULT_PAGE_SIZE, NSLAB};

/// Slab allocator guarding its size classes and page allocator with one lock
pub struct SlabAllocator<P, const PAGE_SIZE: usize = DEFAULT_PAGE_SIZE> {
    table: SpinNoIrq<SlabTable<P, PAGE_SIZE>>,
    initialized: AtomicBool,
}

impl<P: PageAllocator, const PAGE_SIZE: usize> SlabAllocator<P, PAGE_SIZE> {
    pub const fn new(page_allocator: P) -> Self {
        Self {
            table: SpinNoIrq::new(SlabTable::new(page_allocator)),
            initialized: AtomicBool::new(false),
        }
    }

    /// Build every size class, each seeded with one page.
    ///
    /// Must succeed once before objects can be allocated; later calls return
    /// [`SlabError::AlreadyInitialized`].
    pub fn init(&self) -> SlabResult {
        let mut table = self.table.lock();
        table.init()?;
        self.initialized.store(true, Ordering::SeqCst);
        info!(
            "slab allocator: {} size classes ready, page size {}",
            NSLAB, PAGE_SIZE
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Allocate an object of at least `size` bytes.
    pub fn allocate(&self, size: usize) -> SlabResult<NonNull<u8>> {
        let addr = self.table.lock().allocate(size)?;
        NonNull::new(addr as *mut u8).ok_or(SlabError::OutOfMemory)
    }

    /// Return the object at `ptr`, allocated with the given `size`.
    ///
    /// `size` only has to select the same class as the original request.
    /// Null pointers, zero sizes, unknown addresses and slots that are already
    /// free are ignored.
    pub fn free(&self, ptr: *mut u8, size: usize) -> FreeOutcome {
        if ptr.is_null() || size == 0 {
            return FreeOutcome::Ignored;
        }
        if !self.is_initialized() {
            error!("slab allocator: free of {:p} before init", ptr);
            return FreeOutcome::Ignored;
        }
        self.table.lock().free(ptr as usize, size)
    }

    /// Index of the size class serving `size` bytes.
    pub fn class_index_for(size: usize) -> SlabResult<usize> {
        SlabTable::<P, PAGE_SIZE>::class_index_for(size)
    }

    /// Objects currently handed out by class `class_id`.
    pub fn used_count(&self, class_id: usize) -> Option<usize> {
        self.table.lock().class(class_id).map(|c| c.used_objects())
    }

    /// Free object slots on the pages class `class_id` currently owns.
    pub fn free_count(&self, class_id: usize) -> Option<usize> {
        self.table.lock().class(class_id).map(|c| c.free_objects())
    }

    /// Pages currently owned by class `class_id`.
    pub fn page_count(&self, class_id: usize) -> Option<usize> {
        self.table.lock().class(class_id).map(|c| c.num_pages())
    }

    /// Consistent snapshot of every class.
    pub fn class_stats(&self) -> [ClassStats; NSLAB] {
        self.table.lock().class_stats()
    }

    pub fn report(&self) -> SlabReport {
        self.table.lock().report()
    }

    /// Write the slab table to the log.
    pub fn dump(&self) {
        // Format outside the lock
        let report = self.report();
        report.log();
    }

    #[cfg(feature = "tracking")]
    pub fn usage_stats(&self) -> UsageStats {
        self.table.lock().usage_stats()
    }

    /// Run `f` with the page allocator while holding the table lock.
    pub fn with_page_allocator<R>(&self, f: impl FnOnce(&P) -> R) -> R {
        f(self.table.lock().page_allocator())
    }

    /// Run `f` with mutable access to the page allocator, e.g. to hand it
    /// more memory, while holding the table lock.
    pub fn with_page_allocator_mut<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        f(self.table.lock().page_allocator_mut())
    }
}

unsafe impl<P: PageAllocator + Send, const PAGE_SIZE: usize> GlobalAlloc
    for SlabAllocator<P, PAGE_SIZE>
{
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > PAGE_SIZE {
            warn!("slab allocator: alignment too large for layout {:?}", layout);
            return core::ptr::null_mut();
        }
        // Objects sit at multiples of their power-of-two size within a page,
        // so a class at least as large as the alignment satisfies it.
        match self.allocate(layout.size().max(layout.align())) {
            Ok(ptr) => ptr.as_ptr(),
            Err(_) => core::ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.free(ptr, layout.size().max(layout.align()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockPageAllocator, PAGE_SIZE};

    fn allocator() -> SlabAllocator<MockPageAllocator, PAGE_SIZE> {
        SlabAllocator::new(MockPageAllocator::unlimited())
    }

    #[test]
    fn test_uninitialized() {
        let slab = allocator();
        assert!(!slab.is_initialized());
        assert_eq!(slab.allocate(16), Err(SlabError::NotInitialized));
        assert_eq!(slab.used_count(0), None);
        assert_eq!(slab.page_count(0), None);
        assert_eq!(slab.free(0x1000 as *mut u8, 16), FreeOutcome::Ignored);
    }

    #[test]
    fn test_init_twice() {
        let slab = allocator();
        slab.init().unwrap();
        assert!(slab.is_initialized());
        assert_eq!(slab.init(), Err(SlabError::AlreadyInitialized));
        assert_eq!(slab.with_page_allocator(|p| p.allocated.len()), 2 * NSLAB);
    }

    #[test]
    fn test_class_id_bounds() {
        let slab = allocator();
        slab.init().unwrap();
        assert_eq!(slab.used_count(NSLAB - 1), Some(0));
        assert_eq!(slab.page_count(NSLAB - 1), Some(1));
        assert_eq!(slab.free_count(NSLAB - 1), Some(2));
        assert_eq!(slab.used_count(NSLAB), None);
        assert_eq!(slab.page_count(usize::MAX), None);
    }

    #[test]
    fn test_global_alloc_layouts() {
        let slab = allocator();
        slab.init().unwrap();

        let layout = Layout::from_size_align(24, 8).unwrap();
        let ptr = unsafe { GlobalAlloc::alloc(&slab, layout) };
        assert!(!ptr.is_null());
        assert_eq!(slab.used_count(1), Some(1));

        // Alignment bumps the class
        let aligned = Layout::from_size_align(8, 256).unwrap();
        let ptr2 = unsafe { GlobalAlloc::alloc(&slab, aligned) };
        assert!(!ptr2.is_null());
        assert_eq!(ptr2 as usize % 256, 0);
        assert_eq!(slab.used_count(4), Some(1));

        let too_big = Layout::from_size_align(4096, 8).unwrap();
        assert!(unsafe { GlobalAlloc::alloc(&slab, too_big) }.is_null());
        let too_aligned = Layout::from_size_align(8, 8192).unwrap();
        assert!(unsafe { GlobalAlloc::alloc(&slab, too_aligned) }.is_null());

        unsafe {
            GlobalAlloc::dealloc(&slab, ptr, layout);
            GlobalAlloc::dealloc(&slab, ptr2, aligned);
        }
        assert_eq!(slab.used_count(1), Some(0));
        assert_eq!(slab.used_count(4), Some(0));
    }

    #[test]
    fn test_null_page_is_never_handed_out() {
        let slab = allocator();
        slab.init().unwrap();
        let a = slab.allocate(2048).unwrap();
        let b = slab.allocate(2048).unwrap();
        assert_ne!(a, b);

        slab.with_page_allocator_mut(|p| p.null_pages = true);
        assert_eq!(slab.allocate(2048), Err(SlabError::OutOfMemory));
        assert_eq!(slab.used_count(7), Some(2));
        assert_eq!(slab.page_count(7), Some(1));

        slab.with_page_allocator_mut(|p| p.null_pages = false);
        assert!(slab.allocate(2048).is_ok());
        assert_eq!(slab.used_count(7), Some(3));
        assert_eq!(slab.page_count(7), Some(2));
    }
}
