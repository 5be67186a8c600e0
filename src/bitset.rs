//! Fixed-capacity occupancy bitset.
//!
//! Bits are packed eight per byte, bit `idx` living in byte `idx / 8` at
//! position `idx % 8`. The bitset does not own its storage: the slab hands it
//! a region obtained from the page allocator, which outlives the bitset.

use core::ops::Range;

use crate::{SlabError, SlabResult};

pub struct Bitset {
    storage: usize, // Start address of the packed bytes
    capacity: usize,
}

impl Bitset {
    /// A bitset with no storage and zero capacity.
    pub const fn empty() -> Self {
        Self {
            storage: 0,
            capacity: 0,
        }
    }

    /// Number of bytes needed to hold `capacity` bits.
    pub const fn storage_bytes(capacity: usize) -> usize {
        (capacity + 7) / 8
    }

    /// Build a bitset over `storage` and clear all of its bits.
    ///
    /// # Safety
    /// `[storage, storage + Self::storage_bytes(capacity))` must be valid,
    /// writable, and exclusively owned by the bitset for as long as it is used.
    pub unsafe fn new(storage: usize, capacity: usize) -> Self {
        let bitset = Self { storage, capacity };
        unsafe {
            core::ptr::write_bytes(storage as *mut u8, 0, Self::storage_bytes(capacity));
        }
        bitset
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn storage_addr(&self) -> usize {
        self.storage
    }

    fn bytes(&self) -> &[u8] {
        if self.capacity == 0 {
            return &[];
        }
        unsafe {
            core::slice::from_raw_parts(
                self.storage as *const u8,
                Self::storage_bytes(self.capacity),
            )
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        if self.capacity == 0 {
            return &mut [];
        }
        unsafe {
            core::slice::from_raw_parts_mut(
                self.storage as *mut u8,
                Self::storage_bytes(self.capacity),
            )
        }
    }

    pub fn get(&self, idx: usize) -> SlabResult<bool> {
        if idx >= self.capacity {
            return Err(SlabError::OutOfRange);
        }
        Ok((self.bytes()[idx / 8] >> (idx % 8)) & 1 == 1)
    }

    pub fn set(&mut self, idx: usize, value: bool) -> SlabResult {
        if idx >= self.capacity {
            return Err(SlabError::OutOfRange);
        }
        let byte = &mut self.bytes_mut()[idx / 8];
        let mask = 1u8 << (idx % 8);
        if value {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
        Ok(())
    }

    /// Lowest clear bit in `range`, clamped to the capacity.
    pub fn first_clear(&self, range: Range<usize>) -> Option<usize> {
        let bytes = self.bytes();
        let end = range.end.min(self.capacity);
        let mut idx = range.start;
        while idx < end {
            let byte = bytes[idx / 8];
            // Skip whole full bytes
            if idx % 8 == 0 && byte == u8::MAX {
                idx += 8;
                continue;
            }
            if (byte >> (idx % 8)) & 1 == 0 {
                return Some(idx);
            }
            idx += 1;
        }
        None
    }

    /// Whether any bit in `range` is set, clamped to the capacity.
    pub fn any_set(&self, range: Range<usize>) -> bool {
        let bytes = self.bytes();
        let end = range.end.min(self.capacity);
        let mut idx = range.start;
        while idx < end {
            let byte = bytes[idx / 8];
            if idx % 8 == 0 && idx + 8 <= end {
                if byte != 0 {
                    return true;
                }
                idx += 8;
                continue;
            }
            if (byte >> (idx % 8)) & 1 == 1 {
                return true;
            }
            idx += 1;
        }
        false
    }
}
