//! A single size class of the slab allocator.
//!
//! A size class splits every page it owns into `objects_per_page` equal slots
//! and tracks them in one bitset indexed by `slot * objects_per_page + offset`,
//! where `slot` is the position of the page in the class's page array.

#[cfg(feature = "log")]
use log::{debug, warn};

use crate::bitset::Bitset;
use crate::stats::ClassStats;
use crate::{
    PageAllocator, SlabError, SlabResult, DEFAULT_PAGE_SIZE, MAX_PAGES_PER_SLAB, MIN_OBJECT_SIZE,
};

/// What a call to free did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeOutcome {
    /// The object was released; its page still holds other objects.
    Freed,
    /// The object was the last one on its page, and the page went back to the
    /// page allocator.
    PageReleased,
    /// The slot was already free. Nothing changed.
    AlreadyFree,
    /// Null pointer, zero or oversized size, or an address this class does
    /// not own. Nothing changed.
    Ignored,
}

pub struct SizeClass<const PAGE_SIZE: usize = DEFAULT_PAGE_SIZE> {
    object_size: usize,
    objects_per_page: usize,
    pages: [Option<usize>; MAX_PAGES_PER_SLAB],
    bitmap: Bitset,
    num_pages: usize,
    used_objects: usize,
    free_objects: usize,
}

impl<const PAGE_SIZE: usize> SizeClass<PAGE_SIZE> {
    /// An unbuilt size class for tier `index`. It owns no memory until
    /// [`init`](Self::init) runs.
    pub const fn new(index: usize) -> Self {
        let object_size = MIN_OBJECT_SIZE << index;
        Self {
            object_size,
            objects_per_page: PAGE_SIZE / object_size,
            pages: [None; MAX_PAGES_PER_SLAB],
            bitmap: Bitset::empty(),
            num_pages: 0,
            used_objects: 0,
            free_objects: 0,
        }
    }

    /// Acquire the bitmap storage and the first backing page.
    pub fn init(&mut self, page_allocator: &mut dyn PageAllocator) -> SlabResult {
        let capacity = MAX_PAGES_PER_SLAB * self.objects_per_page;
        if self.objects_per_page == 0 || Bitset::storage_bytes(capacity) > PAGE_SIZE {
            warn!(
                "slab: object size {} does not fit page size {}",
                self.object_size, PAGE_SIZE
            );
            return Err(SlabError::InvalidParam);
        }

        let bitmap_page = Self::acquire_page(page_allocator)?;
        let first_page = match Self::acquire_page(page_allocator) {
            Ok(page) => page,
            Err(e) => {
                page_allocator.dealloc_page(bitmap_page);
                return Err(e);
            }
        };

        // SAFETY: the page is ours until `release_all`, and holds `capacity` bits
        self.bitmap = unsafe { Bitset::new(bitmap_page, capacity) };
        self.pages = [None; MAX_PAGES_PER_SLAB];
        self.pages[0] = Some(first_page);
        self.num_pages = 1;
        self.used_objects = 0;
        self.free_objects = self.objects_per_page;
        Ok(())
    }

    /// Hand every page, including the bitmap storage, back to the page
    /// allocator. Only used to unwind a failed table initialization, when no
    /// object has been given out yet.
    pub(crate) fn release_all(&mut self, page_allocator: &mut dyn PageAllocator) {
        for page in self.pages.iter_mut() {
            if let Some(addr) = page.take() {
                page_allocator.dealloc_page(addr);
            }
        }
        if self.bitmap.capacity() != 0 {
            page_allocator.dealloc_page(self.bitmap.storage_addr());
            self.bitmap = Bitset::empty();
        }
        self.num_pages = 0;
        self.used_objects = 0;
        self.free_objects = 0;
    }

    /// Request one page, treating address 0 as a failed allocation.
    fn acquire_page(page_allocator: &mut dyn PageAllocator) -> SlabResult<usize> {
        match page_allocator.alloc_page()? {
            0 => {
                warn!("slab: page allocator returned a null page");
                Err(SlabError::OutOfMemory)
            }
            page => Ok(page),
        }
    }

    fn slot_range(&self, slot: usize) -> core::ops::Range<usize> {
        slot * self.objects_per_page..(slot + 1) * self.objects_per_page
    }

    /// Allocate an object and return its address.
    ///
    /// Free slots on pages the class already owns are used first; only when
    /// every owned page is full is a new page requested.
    pub fn alloc_object(&mut self, page_allocator: &mut dyn PageAllocator) -> SlabResult<usize> {
        // 1. Reuse a free slot on an existing page
        for slot in 0..MAX_PAGES_PER_SLAB {
            let Some(base) = self.pages[slot] else {
                continue;
            };
            if let Some(idx) = self.bitmap.first_clear(self.slot_range(slot)) {
                self.bitmap.set(idx, true)?;
                self.used_objects += 1;
                self.free_objects -= 1;
                let offset = idx - slot * self.objects_per_page;
                return Ok(base + offset * self.object_size);
            }
        }

        // 2. Grow into the first empty page slot
        let slot = self
            .pages
            .iter()
            .position(Option::is_none)
            .ok_or(SlabError::OutOfMemory)?;
        let base = Self::acquire_page(page_allocator)?;

        self.pages[slot] = Some(base);
        self.bitmap.set(slot * self.objects_per_page, true)?;
        self.num_pages += 1;
        self.used_objects += 1;
        self.free_objects += self.objects_per_page - 1;
        debug!(
            "slab {}: grew to {} pages, new page {:#x} at slot {}",
            self.object_size, self.num_pages, base, slot
        );
        Ok(base)
    }

    /// Find the page slot and bit index owning `addr`.
    ///
    /// Returns `None` unless `addr` lies inside a page this class currently
    /// owns and sits on an object boundary.
    pub fn locate(&self, addr: usize) -> Option<(usize, usize)> {
        let (slot, base) = self
            .pages
            .iter()
            .enumerate()
            .find_map(|(slot, page)| match *page {
                Some(base) if addr >= base && addr - base < PAGE_SIZE => Some((slot, base)),
                _ => None,
            })?;

        let offset = addr - base;
        if offset % self.object_size != 0 || offset / self.object_size >= self.objects_per_page {
            return None;
        }
        Some((slot, slot * self.objects_per_page + offset / self.object_size))
    }

    /// Release the object at `addr`. Empty pages go straight back to the page
    /// allocator.
    pub fn dealloc_object(
        &mut self,
        addr: usize,
        page_allocator: &mut dyn PageAllocator,
    ) -> SlabResult<FreeOutcome> {
        let Some((slot, idx)) = self.locate(addr) else {
            warn!(
                "slab {}: {:#x} is not an object of this class",
                self.object_size, addr
            );
            return Ok(FreeOutcome::Ignored);
        };

        if !self.bitmap.get(idx)? {
            return Ok(FreeOutcome::AlreadyFree);
        }

        self.bitmap.set(idx, false)?;
        self.used_objects -= 1;
        self.free_objects += 1;

        if self.bitmap.any_set(self.slot_range(slot)) {
            return Ok(FreeOutcome::Freed);
        }

        if let Some(base) = self.pages[slot].take() {
            page_allocator.dealloc_page(base);
            self.num_pages -= 1;
            self.free_objects -= self.objects_per_page;
            debug!(
                "slab {}: released page {:#x}, {} pages left",
                self.object_size, base, self.num_pages
            );
        }
        Ok(FreeOutcome::PageReleased)
    }

    pub fn object_size(&self) -> usize {
        self.object_size
    }

    pub fn objects_per_page(&self) -> usize {
        self.objects_per_page
    }

    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    pub fn used_objects(&self) -> usize {
        self.used_objects
    }

    pub fn free_objects(&self) -> usize {
        self.free_objects
    }

    /// Base address of the page at `slot`, if one is present.
    pub fn page(&self, slot: usize) -> Option<usize> {
        self.pages.get(slot).copied().flatten()
    }

    pub fn stats(&self) -> ClassStats {
        ClassStats {
            object_size: self.object_size,
            objects_per_page: self.objects_per_page,
            num_pages: self.num_pages,
            used_objects: self.used_objects,
            free_objects: self.free_objects,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockPageAllocator, PAGE_SIZE};

    fn assert_balanced(class: &SizeClass<PAGE_SIZE>) {
        assert_eq!(
            class.used_objects() + class.free_objects(),
            class.num_pages() * class.objects_per_page()
        );
    }

    #[test]
    fn test_geometry() {
        let class = SizeClass::<PAGE_SIZE>::new(0);
        assert_eq!(class.object_size(), 16);
        assert_eq!(class.objects_per_page(), 256);

        let class = SizeClass::<PAGE_SIZE>::new(7);
        assert_eq!(class.object_size(), 2048);
        assert_eq!(class.objects_per_page(), 2);
    }

    #[test]
    fn test_init_seeds_one_page() {
        let mut pages = MockPageAllocator::unlimited();
        let mut class = SizeClass::<PAGE_SIZE>::new(2);
        class.init(&mut pages).unwrap();

        assert_eq!(class.num_pages(), 1);
        assert_eq!(class.used_objects(), 0);
        assert_eq!(class.free_objects(), 64);
        assert!(class.page(0).is_some());
        // Bitmap page plus the first backing page
        assert_eq!(pages.allocated.len(), 2);
        assert_balanced(&class);
    }

    #[test]
    fn test_init_rejects_oversized_objects() {
        let mut pages = MockPageAllocator::unlimited();
        // 2048-byte objects do not fit a 1 KiB page
        let mut class = SizeClass::<1024>::new(7);
        assert_eq!(class.init(&mut pages), Err(SlabError::InvalidParam));
        assert!(pages.allocated.is_empty());
    }

    #[test]
    fn test_init_unwinds_on_oom() {
        let mut pages = MockPageAllocator::new(1);
        let mut class = SizeClass::<PAGE_SIZE>::new(0);
        assert_eq!(class.init(&mut pages), Err(SlabError::OutOfMemory));
        assert!(pages.allocated.is_empty());
    }

    #[test]
    fn test_alloc_is_sequential_within_page() {
        let mut pages = MockPageAllocator::unlimited();
        let mut class = SizeClass::<PAGE_SIZE>::new(2);
        class.init(&mut pages).unwrap();
        let base = class.page(0).unwrap();

        for i in 0..4 {
            let addr = class.alloc_object(&mut pages).unwrap();
            assert_eq!(addr, base + i * 64);
        }
        assert_eq!(class.used_objects(), 4);
        assert_balanced(&class);
    }

    #[test]
    fn test_alloc_reuses_freed_slot() {
        let mut pages = MockPageAllocator::unlimited();
        let mut class = SizeClass::<PAGE_SIZE>::new(0);
        class.init(&mut pages).unwrap();

        let a = class.alloc_object(&mut pages).unwrap();
        let b = class.alloc_object(&mut pages).unwrap();
        let _c = class.alloc_object(&mut pages).unwrap();
        assert_eq!(class.dealloc_object(b, &mut pages), Ok(FreeOutcome::Freed));
        assert_eq!(class.alloc_object(&mut pages).unwrap(), b);
        assert_ne!(a, b);
        assert_balanced(&class);
    }

    #[test]
    fn test_growth_returns_new_page_base() {
        let mut pages = MockPageAllocator::unlimited();
        let mut class = SizeClass::<PAGE_SIZE>::new(7);
        class.init(&mut pages).unwrap();

        class.alloc_object(&mut pages).unwrap();
        class.alloc_object(&mut pages).unwrap();
        assert_eq!(class.num_pages(), 1);

        let addr = class.alloc_object(&mut pages).unwrap();
        assert_eq!(class.num_pages(), 2);
        assert_eq!(class.page(1), Some(addr));
        assert_eq!(class.used_objects(), 3);
        assert_eq!(class.free_objects(), 1);
        assert_balanced(&class);
    }

    #[test]
    fn test_growth_failure_leaves_counters() {
        // Bitmap page plus the seed page, nothing more
        let mut pages = MockPageAllocator::new(2);
        let mut class = SizeClass::<PAGE_SIZE>::new(7);
        class.init(&mut pages).unwrap();
        class.alloc_object(&mut pages).unwrap();
        class.alloc_object(&mut pages).unwrap();

        assert_eq!(class.alloc_object(&mut pages), Err(SlabError::OutOfMemory));
        assert_eq!(class.num_pages(), 1);
        assert_eq!(class.used_objects(), 2);
        assert_eq!(class.free_objects(), 0);
        assert_balanced(&class);
    }

    #[test]
    fn test_init_rejects_null_page() {
        let mut pages = MockPageAllocator::unlimited();
        pages.null_pages = true;
        let mut class = SizeClass::<PAGE_SIZE>::new(0);
        assert_eq!(class.init(&mut pages), Err(SlabError::OutOfMemory));
        assert_eq!(class.num_pages(), 0);
        assert_eq!(class.free_objects(), 0);
        assert!(class.page(0).is_none());
    }

    #[test]
    fn test_growth_rejects_null_page() {
        let mut pages = MockPageAllocator::unlimited();
        let mut class = SizeClass::<PAGE_SIZE>::new(7);
        class.init(&mut pages).unwrap();
        class.alloc_object(&mut pages).unwrap();
        class.alloc_object(&mut pages).unwrap();

        pages.null_pages = true;
        assert_eq!(class.alloc_object(&mut pages), Err(SlabError::OutOfMemory));
        assert_eq!(class.num_pages(), 1);
        assert_eq!(class.used_objects(), 2);
        assert!(class.page(1).is_none());
        assert_balanced(&class);

        // The slot stays free for a real page later
        pages.null_pages = false;
        let addr = class.alloc_object(&mut pages).unwrap();
        assert_eq!(class.page(1), Some(addr));
        assert_eq!(class.num_pages(), 2);
        assert_balanced(&class);
    }

    #[test]
    fn test_locate_rejects_foreign_and_misaligned() {
        let mut pages = MockPageAllocator::unlimited();
        let mut class = SizeClass::<PAGE_SIZE>::new(2);
        class.init(&mut pages).unwrap();
        let base = class.page(0).unwrap();

        assert_eq!(class.locate(base), Some((0, 0)));
        assert_eq!(class.locate(base + 64 * 3), Some((0, 3)));
        assert_eq!(class.locate(base + 65), None);
        assert_eq!(class.locate(base + PAGE_SIZE), None);
        assert_eq!(class.locate(base.wrapping_sub(64)), None);
    }

    #[test]
    fn test_dealloc_outcomes() {
        let mut pages = MockPageAllocator::unlimited();
        let mut class = SizeClass::<PAGE_SIZE>::new(7);
        class.init(&mut pages).unwrap();

        let a = class.alloc_object(&mut pages).unwrap();
        let b = class.alloc_object(&mut pages).unwrap();

        assert_eq!(class.dealloc_object(a, &mut pages), Ok(FreeOutcome::Freed));
        assert_eq!(
            class.dealloc_object(a, &mut pages),
            Ok(FreeOutcome::AlreadyFree)
        );
        assert_eq!(
            class.dealloc_object(a + 1, &mut pages),
            Ok(FreeOutcome::Ignored)
        );
        assert_eq!(
            class.dealloc_object(b, &mut pages),
            Ok(FreeOutcome::PageReleased)
        );

        // The last page went back as well
        assert_eq!(class.num_pages(), 0);
        assert_eq!(class.used_objects(), 0);
        assert_eq!(class.free_objects(), 0);
        assert_eq!(pages.allocated.len(), 1);
        assert_balanced(&class);

        // And the class grows again from nothing
        let c = class.alloc_object(&mut pages).unwrap();
        assert_eq!(class.page(0), Some(c));
        assert_eq!(class.num_pages(), 1);
        assert_balanced(&class);
    }

    #[test]
    fn test_release_all() {
        let mut pages = MockPageAllocator::unlimited();
        let mut class = SizeClass::<PAGE_SIZE>::new(3);
        class.init(&mut pages).unwrap();
        class.release_all(&mut pages);
        assert!(pages.allocated.is_empty());
        assert_eq!(class.num_pages(), 0);
    }
}
