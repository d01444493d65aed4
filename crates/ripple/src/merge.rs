#![forbid(unsafe_code)]

//! Fixed-capacity tracker recording which inputs of a combine have emitted.
//!
//! Bits are only ever set. A combine creates a fresh tracker per activation,
//! so the "all observed" latch is scoped to one activation.

use crate::error::{ReactiveError, Result};

/// Bit accumulator over `len <= CAPACITY` slot indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeTracker {
    bits: u32,
    full: u32,
    len: usize,
}

impl MergeTracker {
    /// Maximum number of addressable slots.
    pub const CAPACITY: usize = u32::BITS as usize;

    pub fn new(len: usize) -> Result<Self> {
        if len > Self::CAPACITY {
            return Err(ReactiveError::Capacity {
                requested: len,
                max: Self::CAPACITY,
            });
        }
        let full = if len == Self::CAPACITY {
            u32::MAX
        } else {
            (1u32 << len) - 1
        };
        Ok(Self { bits: 0, full, len })
    }

    /// Mark slot `index` as observed. Out-of-range indices are ignored.
    pub fn mark(&mut self, index: usize) {
        debug_assert!(index < self.len, "slot {index} out of range {}", self.len);
        if index < self.len {
            self.bits |= 1 << index;
        }
    }

    #[must_use]
    pub fn is_marked(&self, index: usize) -> bool {
        index < self.len && self.bits & (1 << index) != 0
    }

    /// True once every slot in `[0, len)` has been marked.
    #[must_use]
    pub fn all_observed(&self) -> bool {
        self.bits == self.full
    }

    #[must_use]
    pub fn observed_count(&self) -> usize {
        self.bits.count_ones() as usize
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
