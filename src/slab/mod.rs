//! Slab allocator implementation.
//!
//! This module implements the size classes of the slab allocator and the
//! table that groups them, tracking objects with per-class bitmaps.

pub mod size_class;
pub mod slab_table;

// Re-export public types
pub use size_class::{FreeOutcome, SizeClass};
pub use slab_table::SlabTable;
