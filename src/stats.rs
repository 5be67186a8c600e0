//! Statistics and diagnostics for the slab allocator
//!
//! Provides per-class snapshots and the table dump.

use core::fmt;

#[cfg(feature = "log")]
use log::info;

use crate::NSLAB;

/// Snapshot of one size class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassStats {
    pub object_size: usize,
    pub objects_per_page: usize,
    pub num_pages: usize,
    pub used_objects: usize,
    pub free_objects: usize,
}

impl ClassStats {
    /// Object slots across all pages the class owns.
    pub fn capacity(&self) -> usize {
        self.num_pages * self.objects_per_page
    }
}

/// Snapshot of every size class, rendered as the slab dump table.
#[derive(Debug, Clone, Copy)]
pub struct SlabReport {
    classes: [ClassStats; NSLAB],
}

impl SlabReport {
    pub const HEADER: &'static str = "size\tnum_pages\tused_objects\tfree_objects";

    pub const fn new(classes: [ClassStats; NSLAB]) -> Self {
        Self { classes }
    }

    pub fn classes(&self) -> &[ClassStats; NSLAB] {
        &self.classes
    }

    /// Pages held across all classes, excluding bitmap storage.
    pub fn total_pages(&self) -> usize {
        self.classes.iter().map(|c| c.num_pages).sum()
    }

    pub fn total_used_objects(&self) -> usize {
        self.classes.iter().map(|c| c.used_objects).sum()
    }

    /// Emit the report line by line at info level.
    pub fn log(&self) {
        info!("__slabdump__");
        info!("{}", Self::HEADER);
        for _class in self.classes.iter() {
            info!(
                "{}\t{}\t\t{}\t\t{}",
                _class.object_size, _class.num_pages, _class.used_objects, _class.free_objects
            );
        }
    }
}

impl fmt::Display for SlabReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "__slabdump__")?;
        writeln!(f, "{}", Self::HEADER)?;
        for class in self.classes.iter() {
            writeln!(
                f,
                "{}\t{}\t\t{}\t\t{}",
                class.object_size, class.num_pages, class.used_objects, class.free_objects
            )?;
        }
        Ok(())
    }
}

/// Cumulative allocation counters
#[cfg(feature = "tracking")]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageStats {
    pub allocations: u64,
    pub frees: u64,
    pub failed_allocations: u64,
    pub pages_acquired: u64,
    pub pages_released: u64,
}

#[cfg(feature = "tracking")]
impl UsageStats {
    pub const fn new() -> Self {
        Self {
            allocations: 0,
            frees: 0,
            failed_allocations: 0,
            pages_acquired: 0,
            pages_released: 0,
        }
    }
}
