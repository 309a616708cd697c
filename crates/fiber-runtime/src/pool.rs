//! Growable pool of fiber units
//!
//! A unit is a guarded stack plus the saved register file of the context
//! running on it. Units are boxed so their addresses stay fixed while the
//! pool's `Vec` grows; `context_switch` holds raw pointers into them.
//!
//! Units are created `initial` at a time up front, `grow` at a time when the
//! pool runs dry, and never freed individually. Released units are reused
//! most-recently-released first, whose stack pages are still warm.

use crate::arch::SavedRegs;
use crate::stack::FiberStack;
use fiber_core::{FiberId, FiberState, RuntimeResult, SlotAllocator};
use tracing::debug;

/// Work a fiber runs once, on its own stack
pub type Task = Box<dyn FnOnce() + 'static>;

/// One stack + execution context
pub struct FiberUnit {
    pub(crate) regs: SavedRegs,
    pub(crate) stack: FiberStack,
    pub(crate) state: FiberState,
    pub(crate) task: Option<Task>,
    pub(crate) daemon: bool,
}

impl FiberUnit {
    fn new(stack_size: usize) -> RuntimeResult<Box<Self>> {
        Ok(Box::new(Self {
            regs: SavedRegs::default(),
            stack: FiberStack::new(stack_size)?,
            state: FiberState::Free,
            task: None,
            daemon: false,
        }))
    }

    #[inline]
    pub fn state(&self) -> FiberState {
        self.state
    }

    #[inline]
    pub fn is_daemon(&self) -> bool {
        self.daemon
    }
}

/// Pool of fiber units
pub struct FiberPool {
    units: Vec<Box<FiberUnit>>,
    slots: SlotAllocator,
    grow: usize,
    stack_size: usize,
}

impl FiberPool {
    /// Create a pool with `initial` units ready, growing by `grow` units
    /// up to `max` in total.
    pub fn new(initial: usize, grow: usize, stack_size: usize, max: usize) -> RuntimeResult<Self> {
        let mut pool = Self {
            units: Vec::with_capacity(initial.min(max)),
            slots: SlotAllocator::new(max),
            grow: grow.max(1),
            stack_size,
        };
        pool.extend(initial.min(max))?;
        debug!(initial = pool.units.len(), grow, stack_size, max, "fiber pool created");
        Ok(pool)
    }

    /// Take a free unit, growing the pool when none is left.
    pub fn acquire(&mut self) -> RuntimeResult<FiberId> {
        let slot = self.slots.allocate()?;
        let idx = slot as usize;

        if idx >= self.units.len() {
            let target = (self.units.len() + self.grow)
                .min(self.slots.max_slots() as usize)
                .max(idx + 1);
            if let Err(e) = self.extend(target - self.units.len()) {
                self.slots.release(slot);
                return Err(e);
            }
            debug!(units = self.units.len(), "fiber pool grew");
        }

        let id = FiberId::new(slot);
        if let Some(unit) = self.unit_mut(id) {
            unit.state = FiberState::Ready;
        }
        Ok(id)
    }

    /// Return a unit to the pool. Any task it still holds is dropped.
    /// Releasing a free unit does nothing.
    pub fn release(&mut self, id: FiberId) {
        if let Some(unit) = self.units.get_mut(id.as_usize()) {
            if unit.state == FiberState::Free {
                return;
            }
            unit.state = FiberState::Free;
            unit.task = None;
            unit.daemon = false;
            self.slots.release(id.as_u32());
        }
    }

    #[inline]
    pub fn unit(&self, id: FiberId) -> Option<&FiberUnit> {
        self.units.get(id.as_usize()).map(|u| &**u)
    }

    #[inline]
    pub fn unit_mut(&mut self, id: FiberId) -> Option<&mut FiberUnit> {
        self.units.get_mut(id.as_usize()).map(|u| &mut **u)
    }

    /// Units created so far
    #[inline]
    pub fn capacity(&self) -> usize {
        self.units.len()
    }

    /// Units currently handed out
    #[inline]
    pub fn in_use(&self) -> usize {
        self.slots.allocated_count() as usize
    }

    fn extend(&mut self, n: usize) -> RuntimeResult<()> {
        for _ in 0..n {
            self.units.push(FiberUnit::new(self.stack_size)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiber_core::RuntimeError;

    const STACK: usize = 16 * 1024;

    #[test]
    fn test_initial_units_created() {
        let pool = FiberPool::new(4, 2, STACK, 16).unwrap();
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_grows_by_increment() {
        let mut pool = FiberPool::new(2, 3, STACK, 16).unwrap();
        let ids: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(ids[2].as_u32(), 2);
        assert_eq!(pool.capacity(), 5);
        assert_eq!(pool.in_use(), 3);
    }

    #[test]
    fn test_growth_capped_at_max() {
        let mut pool = FiberPool::new(1, 100, STACK, 3).unwrap();
        for _ in 0..3 {
            pool.acquire().unwrap();
        }
        assert_eq!(pool.capacity(), 3);
        assert!(matches!(pool.acquire(), Err(RuntimeError::NoSlotsAvailable)));
    }

    #[test]
    fn test_release_reuses_lifo() {
        let mut pool = FiberPool::new(4, 1, STACK, 4).unwrap();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.acquire().unwrap(), b);
        assert_eq!(pool.acquire().unwrap(), a);
    }

    #[test]
    fn test_double_release_ignored() {
        let mut pool = FiberPool::new(2, 1, STACK, 2).unwrap();
        let a = pool.acquire().unwrap();
        pool.release(a);
        pool.release(a);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.acquire().unwrap(), a);
        assert_ne!(pool.acquire().unwrap(), a);
    }

    #[test]
    fn test_release_drops_pending_task() {
        use std::rc::Rc;

        let mut pool = FiberPool::new(1, 1, STACK, 1).unwrap();
        let id = pool.acquire().unwrap();
        let token = Rc::new(());
        let held = token.clone();
        pool.unit_mut(id).unwrap().task = Some(Box::new(move || drop(held)));
        assert_eq!(Rc::strong_count(&token), 2);

        pool.release(id);
        assert_eq!(Rc::strong_count(&token), 1);
        assert_eq!(pool.unit(id).unwrap().state(), FiberState::Free);
    }
}
