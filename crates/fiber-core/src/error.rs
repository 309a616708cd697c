//! Error types for the fiber runtime

use std::io;

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors that can occur in runtime operations
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Fiber pool reached its configured ceiling
    #[error("no fiber slots available")]
    NoSlotsAvailable,

    /// A fiber-only operation was called from the scheduler context
    #[error("operation requires a running fiber")]
    NotInFiber,

    /// A scheduler-only operation (`run`, `turn`) was called from a fiber
    #[error("operation must be called from the scheduler context")]
    InFiber,

    /// A descriptor beyond the table sized at initialization
    #[error("fd {fd} outside descriptor table (limit {limit})")]
    FdOutOfRange { fd: i32, limit: usize },

    /// Stack mapping failed
    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    /// epoll_create/epoll_ctl/epoll_wait failed
    #[error("reactor error: {0}")]
    Reactor(#[source] io::Error),

    /// Querying a process resource limit failed
    #[error("resource limit query failed: {0}")]
    ResourceLimit(#[source] io::Error),

    /// Configuration rejected by `validate()`
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Memory-related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    /// mmap failed
    #[error("stack allocation failed")]
    AllocationFailed,

    /// mprotect on the guard page failed
    #[error("guard page protection failed")]
    ProtectionFailed,

    /// Requested stack size overflows the address computation
    #[error("stack size too large")]
    TooLarge,
}
