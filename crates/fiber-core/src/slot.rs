//! Slot allocator for fiber units and connection slots
//!
//! Hands out dense `u32` indices below a fixed ceiling. Uses a LIFO free
//! stack so the most recently released index is reused first, keeping the
//! hot part of any table indexed by slot small.
//!
//! The runtime is single-threaded, so unlike a scheduler shared between
//! worker threads there is no locking here.

use crate::error::{RuntimeError, RuntimeResult};

/// LIFO slot allocator
#[derive(Debug)]
pub struct SlotAllocator {
    /// Released slot indices, most recent last
    free_stack: Vec<u32>,

    /// Next never-used index
    next_fresh: u32,

    /// Indices are always below this
    max_slots: u32,

    /// Number of currently allocated slots
    allocated_count: u32,
}

impl SlotAllocator {
    /// Create an allocator for indices `0..max_slots`
    pub fn new(max_slots: usize) -> Self {
        let max_slots = u32::try_from(max_slots).unwrap_or(u32::MAX - 1);
        Self {
            free_stack: Vec::new(),
            next_fresh: 0,
            max_slots,
            allocated_count: 0,
        }
    }

    /// Allocate a slot, preferring the most recently released one.
    pub fn allocate(&mut self) -> RuntimeResult<u32> {
        if let Some(slot) = self.free_stack.pop() {
            self.allocated_count += 1;
            return Ok(slot);
        }

        if self.next_fresh >= self.max_slots {
            return Err(RuntimeError::NoSlotsAvailable);
        }
        let slot = self.next_fresh;
        self.next_fresh += 1;
        self.allocated_count += 1;
        Ok(slot)
    }

    /// Return a slot to the allocator.
    ///
    /// Releasing an index that was never handed out is a logic error and is
    /// ignored in release builds.
    pub fn release(&mut self, slot: u32) {
        debug_assert!(slot < self.next_fresh, "releasing unallocated slot {}", slot);
        if slot >= self.next_fresh {
            return;
        }
        self.free_stack.push(slot);
        self.allocated_count -= 1;
    }

    #[inline]
    pub fn allocated_count(&self) -> u32 {
        self.allocated_count
    }

    #[inline]
    pub fn max_slots(&self) -> u32 {
        self.max_slots
    }

    /// Number of indices ever handed out (high-water mark)
    #[inline]
    pub fn high_water(&self) -> u32 {
        self.next_fresh
    }

    /// Get the number of fresh (never-used) slots remaining
    #[inline]
    pub fn fresh_remaining(&self) -> u32 {
        self.max_slots.saturating_sub(self.next_fresh)
    }
}
