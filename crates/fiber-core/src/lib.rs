//! # fiber-core
//!
//! Core types for the single-threaded fiber runtime and the HTTP client
//! pool built on top of it.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Context switching, stacks and epoll live in `fiber-runtime`.
//!
//! ## Modules
//!
//! - `id` - Fiber identifier type
//! - `state` - Fiber lifecycle states
//! - `slot` - LIFO slot allocator (fiber units, connection slots)
//! - `list` - Doubly-linked lists threaded through a dense index arena
//! - `error` - Error types
//! - `env` - Environment variable utilities

pub mod id;
pub mod state;
pub mod slot;
pub mod list;
pub mod error;
pub mod env;

// Re-exports for convenience
pub use id::FiberId;
pub use state::FiberState;
pub use slot::SlotAllocator;
pub use list::{LinkArena, ListHead};
pub use error::{MemoryError, RuntimeError, RuntimeResult};
pub use env::{env_get, env_get_bool, env_get_opt};

/// Constants for fiber memory layout
pub mod constants {
    /// Default usable stack per fiber (256 KB).
    ///
    /// Stacks are reserved with `MAP_NORESERVE`, so untouched pages cost
    /// nothing physical.
    pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

    /// Smallest stack the runtime accepts.
    pub const MIN_STACK_SIZE: usize = 16 * 1024;

    /// Guard page size (4 KB), below the lowest usable stack byte
    pub const GUARD_SIZE: usize = 4096;

    /// Default number of fiber units created up front
    pub const DEFAULT_INITIAL_FIBERS: usize = 64;

    /// Default number of units added each time the pool runs dry
    pub const DEFAULT_GROW_FIBERS: usize = 64;

    /// Default hard ceiling on fiber units
    pub const DEFAULT_MAX_FIBERS: usize = 65536;

    /// Default epoll batch size
    pub const DEFAULT_EVENTS_PER_POLL: usize = 256;

    /// No fiber sentinel value
    pub const FIBER_NONE: u32 = u32::MAX;
}
