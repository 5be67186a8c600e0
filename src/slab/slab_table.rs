//! The table of size classes and the page allocator backing them.
//!
//! `SlabTable` does no locking of its own; [`SlabAllocator`](crate::SlabAllocator)
//! keeps it behind a single spin lock.

#[cfg(feature = "log")]
use log::{error, warn};

use super::size_class::{FreeOutcome, SizeClass};
#[cfg(feature = "tracking")]
use crate::stats::UsageStats;
use crate::stats::{ClassStats, SlabReport};
use crate::{PageAllocator, SlabError, SlabResult, DEFAULT_PAGE_SIZE, MIN_OBJECT_SIZE, NSLAB};

pub struct SlabTable<P, const PAGE_SIZE: usize = DEFAULT_PAGE_SIZE> {
    classes: [SizeClass<PAGE_SIZE>; NSLAB],
    page_allocator: P,
    initialized: bool,
    #[cfg(feature = "tracking")]
    usage: UsageStats,
}

impl<P: PageAllocator, const PAGE_SIZE: usize> SlabTable<P, PAGE_SIZE> {
    pub const fn new(page_allocator: P) -> Self {
        Self {
            classes: [
                SizeClass::new(0),
                SizeClass::new(1),
                SizeClass::new(2),
                SizeClass::new(3),
                SizeClass::new(4),
                SizeClass::new(5),
                SizeClass::new(6),
                SizeClass::new(7),
            ],
            page_allocator,
            initialized: false,
            #[cfg(feature = "tracking")]
            usage: UsageStats::new(),
        }
    }

    /// Build every size class with one backing page each.
    ///
    /// Either all classes come up or none do: on failure, pages already taken
    /// are returned to the page allocator.
    pub fn init(&mut self) -> SlabResult {
        if self.initialized {
            return Err(SlabError::AlreadyInitialized);
        }

        for i in 0..NSLAB {
            if let Err(e) = self.classes[i].init(&mut self.page_allocator) {
                error!(
                    "slab: failed to build size class {} ({} bytes): {}",
                    i,
                    self.classes[i].object_size(),
                    e
                );
                for class in self.classes[..i].iter_mut() {
                    class.release_all(&mut self.page_allocator);
                }
                return Err(e);
            }
        }

        #[cfg(feature = "tracking")]
        {
            self.usage.pages_acquired += 2 * NSLAB as u64;
        }

        self.initialized = true;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Index of the smallest class whose objects hold `size` bytes.
    pub fn class_index_for(size: usize) -> SlabResult<usize> {
        if size == 0 {
            return Err(SlabError::InvalidParam);
        }
        (0..NSLAB)
            .find(|&i| size <= MIN_OBJECT_SIZE << i)
            .ok_or(SlabError::NoSuitableClass)
    }

    pub fn allocate(&mut self, size: usize) -> SlabResult<usize> {
        if !self.initialized {
            return Err(SlabError::NotInitialized);
        }

        let result = Self::class_index_for(size).and_then(|index| {
            #[cfg(feature = "tracking")]
            let pages_before = self.classes[index].num_pages();

            let addr = self.classes[index].alloc_object(&mut self.page_allocator)?;

            #[cfg(feature = "tracking")]
            {
                self.usage.allocations += 1;
                if self.classes[index].num_pages() > pages_before {
                    self.usage.pages_acquired += 1;
                }
            }
            Ok(addr)
        });

        if let Err(_e) = result {
            warn!("slab: allocation of {} bytes failed: {}", size, _e);
            #[cfg(feature = "tracking")]
            {
                self.usage.failed_allocations += 1;
            }
        }
        result
    }

    pub fn free(&mut self, addr: usize, size: usize) -> FreeOutcome {
        if addr == 0 || size == 0 || !self.initialized {
            return FreeOutcome::Ignored;
        }
        let Ok(index) = Self::class_index_for(size) else {
            warn!("slab: free of {:#x} with oversized size {}", addr, size);
            return FreeOutcome::Ignored;
        };

        let outcome = self.classes[index]
            .dealloc_object(addr, &mut self.page_allocator)
            .unwrap_or_else(|_e| {
                error!("slab: bitmap inconsistency freeing {:#x}: {}", addr, _e);
                FreeOutcome::Ignored
            });

        #[cfg(feature = "tracking")]
        match outcome {
            FreeOutcome::Freed => self.usage.frees += 1,
            FreeOutcome::PageReleased => {
                self.usage.frees += 1;
                self.usage.pages_released += 1;
            }
            FreeOutcome::AlreadyFree | FreeOutcome::Ignored => {}
        }
        outcome
    }

    /// The class at `class_id`, once the table is built.
    pub fn class(&self, class_id: usize) -> Option<&SizeClass<PAGE_SIZE>> {
        if !self.initialized {
            return None;
        }
        self.classes.get(class_id)
    }

    pub fn class_stats(&self) -> [ClassStats; NSLAB] {
        let mut stats = [ClassStats::default(); NSLAB];
        for (stat, class) in stats.iter_mut().zip(self.classes.iter()) {
            *stat = class.stats();
        }
        stats
    }

    pub fn report(&self) -> SlabReport {
        SlabReport::new(self.class_stats())
    }

    #[cfg(feature = "tracking")]
    pub fn usage_stats(&self) -> UsageStats {
        self.usage
    }

    pub fn page_allocator(&self) -> &P {
        &self.page_allocator
    }

    pub fn page_allocator_mut(&mut self) -> &mut P {
        &mut self.page_allocator
    }
}
