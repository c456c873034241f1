//! Slot bookkeeping for the channel-pool transport
//!
//! A slot is one request/response channel pair. The only shared state is
//! the in-use bitmap; which client holds a slot is tracked by the client.

use crate::constants::MAX_POOL_SIZE;
use crate::error::{CmpError, Result};

/// Index of a slot in `[0, capacity)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotIndex(u32);

impl SlotIndex {
    #[inline]
    pub const fn new(index: u32) -> Self {
        SlotIndex(index)
    }

    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// In-use bitmap (`#[repr(C)]`, lives in shared memory)
///
/// Plain data only: a zeroed bitmap is a valid empty table. Not
/// synchronized by itself; callers hold the pool lock.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotBitmap {
    bits: u64,
    capacity: u32,
    _pad: u32,
}

impl SlotBitmap {
    /// Create an all-free bitmap
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > MAX_POOL_SIZE {
            return Err(CmpError::Config(format!(
                "pool size must be in 1..={}, got {}",
                MAX_POOL_SIZE, capacity
            )));
        }
        Ok(Self { bits: 0, capacity: capacity as u32, _pad: 0 })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    #[inline]
    fn mask(&self) -> u64 {
        if self.capacity as usize >= MAX_POOL_SIZE {
            u64::MAX
        } else {
            (1u64 << self.capacity) - 1
        }
    }

    /// Mark the lowest free slot as in use
    ///
    /// Scans in index order; `None` when every slot is taken.
    #[inline]
    pub fn claim_lowest(&mut self) -> Option<SlotIndex> {
        let free = !self.bits & self.mask();
        if free == 0 {
            return None;
        }
        let idx = free.trailing_zeros();
        self.bits |= 1u64 << idx;
        Some(SlotIndex(idx))
    }

    /// Clear a slot's bit (idempotent)
    #[inline]
    pub fn clear(&mut self, slot: SlotIndex) -> Result<()> {
        self.check(slot)?;
        self.bits &= !(1u64 << slot.0);
        Ok(())
    }

    #[inline]
    pub fn is_set(&self, slot: SlotIndex) -> bool {
        slot.as_usize() < self.capacity() && self.bits & (1u64 << slot.0) != 0
    }

    /// Number of slots in use
    #[inline]
    pub fn in_use(&self) -> usize {
        (self.bits & self.mask()).count_ones() as usize
    }

    #[inline]
    pub fn check(&self, slot: SlotIndex) -> Result<()> {
        if slot.as_usize() >= self.capacity() {
            return Err(CmpError::InvalidSlot {
                index: slot.as_usize(),
                capacity: self.capacity(),
            });
        }
        Ok(())
    }
}

/// A bounded set of channel slots shared between processes
///
/// **Contract:**
/// - `acquire()` never blocks waiting for a slot. With none free it
///   returns `Err(PoolExhausted)` and the caller decides whether to retry.
/// - Slots are handed out lowest index first. No fairness guarantee.
/// - `release()` is idempotent. The pool does not version slots, so a
///   caller must not release an index it no longer owns.
pub trait SlotPool: Send + Sync {
    /// Claim a free slot.
    fn acquire(&self) -> Result<SlotIndex>;

    /// Return a slot to the pool.
    fn release(&self, slot: SlotIndex) -> Result<()>;

    /// Total number of slots.
    fn capacity(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_in_index_order() {
        let mut bm = SlotBitmap::new(4).unwrap();
        assert_eq!(bm.claim_lowest(), Some(SlotIndex::new(0)));
        assert_eq!(bm.claim_lowest(), Some(SlotIndex::new(1)));
        assert_eq!(bm.claim_lowest(), Some(SlotIndex::new(2)));
        assert_eq!(bm.in_use(), 3);

        // Freed hole is reused before higher indices
        bm.clear(SlotIndex::new(1)).unwrap();
        assert_eq!(bm.claim_lowest(), Some(SlotIndex::new(1)));
        assert_eq!(bm.claim_lowest(), Some(SlotIndex::new(3)));
        assert_eq!(bm.claim_lowest(), None);
    }

    #[test]
    fn test_full_width() {
        let mut bm = SlotBitmap::new(MAX_POOL_SIZE).unwrap();
        for i in 0..MAX_POOL_SIZE {
            assert_eq!(bm.claim_lowest(), Some(SlotIndex::new(i as u32)));
        }
        assert_eq!(bm.claim_lowest(), None);
        assert_eq!(bm.in_use(), MAX_POOL_SIZE);
    }

    #[test]
    fn test_clear_idempotent() {
        let mut bm = SlotBitmap::new(2).unwrap();
        let s = bm.claim_lowest().unwrap();
        bm.clear(s).unwrap();
        bm.clear(s).unwrap();
        assert!(!bm.is_set(s));
        assert_eq!(bm.in_use(), 0);
    }

    #[test]
    fn test_invalid() {
        assert!(SlotBitmap::new(0).is_err());
        assert!(SlotBitmap::new(MAX_POOL_SIZE + 1).is_err());

        let mut bm = SlotBitmap::new(2).unwrap();
        assert!(matches!(
            bm.clear(SlotIndex::new(2)),
            Err(CmpError::InvalidSlot { index: 2, capacity: 2 })
        ));
    }
}
