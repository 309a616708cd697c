//! # fiber-runtime
//!
//! Platform runtime for single-threaded cooperative fibers.
//!
//! This crate provides:
//! - Guarded, mmap'ed fiber stacks and the growable fiber pool
//! - Context switching (architecture-specific assembly)
//! - The epoll reactor (edge-triggered readiness)
//! - The scheduler: spawn, park/wake, fd -> fiber dispatch
//!
//! ```rust,ignore
//! use fiber_runtime::{RuntimeConfig, Scheduler};
//!
//! let sched = Scheduler::new(RuntimeConfig::from_env())?;
//! let s = sched.clone();
//! sched.spawn(move || {
//!     // ... I/O that parks on would-block via s.park()
//! })?;
//! sched.run()?;
//! ```

#[cfg(not(target_os = "linux"))]
compile_error!("fiber-runtime requires Linux (epoll)");

pub mod arch;
pub mod config;
pub mod limits;
pub mod pool;
pub mod reactor;
pub mod scheduler;
pub mod stack;

// Re-exports
pub use config::RuntimeConfig;
pub use limits::fd_limit;
pub use pool::FiberPool;
pub use reactor::{Event, Interest};
pub use scheduler::Scheduler;

pub use fiber_core::{FiberId, FiberState, RuntimeError, RuntimeResult};
