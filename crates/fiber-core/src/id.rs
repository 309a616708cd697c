//! Fiber identifier type

use core::fmt;

use crate::constants::FIBER_NONE;

/// Identifier of a fiber unit in the fiber pool.
///
/// The value indexes the pool's unit table, so an id is reused once its
/// unit is released. `u32::MAX` is reserved as the "no fiber" sentinel.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FiberId(u32);

impl FiberId {
    /// Sentinel value indicating no fiber
    pub const NONE: FiberId = FiberId(FIBER_NONE);

    #[inline]
    pub const fn new(id: u32) -> Self {
        FiberId(id)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Get as usize for indexing
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == FIBER_NONE
    }

    #[inline]
    pub const fn is_some(self) -> bool {
        self.0 != FIBER_NONE
    }

    /// Convert to Option
    #[inline]
    pub const fn to_option(self) -> Option<FiberId> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

impl From<u32> for FiberId {
    #[inline]
    fn from(id: u32) -> Self {
        FiberId(id)
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "FiberId(NONE)")
        } else {
            write!(f, "FiberId({})", self.0)
        }
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl Default for FiberId {
    fn default() -> Self {
        FiberId::NONE
    }
}
