//! Fiber lifecycle states

/// State of a fiber unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FiberState {
    /// Sitting in the pool, no entry function bound
    Free = 0,

    /// Bound to an entry function, waiting in the ready queue
    Ready = 1,

    /// Currently executing (at most one fiber at a time)
    Running = 2,

    /// Suspended until an I/O event on a serviced fd or an explicit wake
    Parked = 3,

    /// Entry function returned, unit awaiting release
    Finished = 4,
}

impl FiberState {
    /// Check if this state allows the fiber to be resumed by an I/O event
    #[inline]
    pub const fn is_parked(&self) -> bool {
        matches!(self, FiberState::Parked)
    }

    /// Check if the fiber still owns its unit (bound and not finished)
    #[inline]
    pub const fn is_alive(&self) -> bool {
        matches!(
            self,
            FiberState::Ready | FiberState::Running | FiberState::Parked
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness() {
        assert!(!FiberState::Free.is_alive());
        assert!(FiberState::Ready.is_alive());
        assert!(FiberState::Parked.is_alive());
        assert!(FiberState::Parked.is_parked());
        assert!(!FiberState::Finished.is_alive());
    }
}
