//! Runtime configuration
//!
//! Built-in defaults with `FIBER_*` environment overrides, then adjusted
//! programmatically with the builder methods.
//!
//! ```rust,ignore
//! use fiber_runtime::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env()
//!     .initial_fibers(128)
//!     .stack_size(128 * 1024);
//! ```

use fiber_core::constants::{
    DEFAULT_EVENTS_PER_POLL, DEFAULT_GROW_FIBERS, DEFAULT_INITIAL_FIBERS, DEFAULT_MAX_FIBERS,
    DEFAULT_STACK_SIZE, MIN_STACK_SIZE,
};
use fiber_core::env::env_get;

/// Scheduler and fiber pool configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Fiber units created up front
    pub initial_fibers: usize,
    /// Units added each time the pool runs dry
    pub grow_fibers: usize,
    /// Hard ceiling on fiber units
    pub max_fibers: usize,
    /// Usable stack bytes per fiber
    pub stack_size: usize,
    /// Maximum epoll events taken per wait
    pub events_per_poll: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RuntimeConfig {
    /// Built-in defaults, ignoring the environment.
    pub fn builtin() -> Self {
        Self {
            initial_fibers: DEFAULT_INITIAL_FIBERS,
            grow_fibers: DEFAULT_GROW_FIBERS,
            max_fibers: DEFAULT_MAX_FIBERS,
            stack_size: DEFAULT_STACK_SIZE,
            events_per_poll: DEFAULT_EVENTS_PER_POLL,
        }
    }

    /// Built-in defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `FIBER_INITIAL` - Fiber units created up front
    /// - `FIBER_GROW` - Growth increment
    /// - `FIBER_MAX` - Maximum fiber units
    /// - `FIBER_STACK_SIZE` - Stack bytes per fiber
    /// - `FIBER_EVENTS` - epoll events per wait
    pub fn from_env() -> Self {
        Self {
            initial_fibers: env_get("FIBER_INITIAL", DEFAULT_INITIAL_FIBERS),
            grow_fibers: env_get("FIBER_GROW", DEFAULT_GROW_FIBERS),
            max_fibers: env_get("FIBER_MAX", DEFAULT_MAX_FIBERS),
            stack_size: env_get("FIBER_STACK_SIZE", DEFAULT_STACK_SIZE),
            events_per_poll: env_get("FIBER_EVENTS", DEFAULT_EVENTS_PER_POLL),
        }
    }

    pub fn initial_fibers(mut self, n: usize) -> Self {
        self.initial_fibers = n;
        self
    }

    pub fn grow_fibers(mut self, n: usize) -> Self {
        self.grow_fibers = n;
        self
    }

    pub fn max_fibers(mut self, n: usize) -> Self {
        self.max_fibers = n;
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    pub fn events_per_poll(mut self, n: usize) -> Self {
        self.events_per_poll = n;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_fibers == 0 {
            return Err("max_fibers must be at least 1");
        }
        if self.max_fibers >= u32::MAX as usize {
            return Err("max_fibers exceeds fiber id space");
        }
        if self.initial_fibers > self.max_fibers {
            return Err("initial_fibers must not exceed max_fibers");
        }
        if self.grow_fibers == 0 {
            return Err("grow_fibers must be at least 1");
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err("stack_size below minimum");
        }
        if self.events_per_poll == 0 {
            return Err("events_per_poll must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_is_valid() {
        assert!(RuntimeConfig::builtin().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects() {
        let base = RuntimeConfig::builtin();
        assert!(base.clone().max_fibers(0).validate().is_err());
        assert!(base.clone().grow_fibers(0).validate().is_err());
        assert!(base.clone().stack_size(1024).validate().is_err());
        assert!(base.clone().events_per_poll(0).validate().is_err());
        assert_eq!(
            base.initial_fibers(10).max_fibers(5).validate(),
            Err("initial_fibers must not exceed max_fibers")
        );
    }

    #[test]
    fn test_builder_chain() {
        let cfg = RuntimeConfig::builtin()
            .initial_fibers(2)
            .grow_fibers(3)
            .max_fibers(9)
            .stack_size(MIN_STACK_SIZE);
        assert_eq!(cfg.initial_fibers, 2);
        assert_eq!(cfg.grow_fibers, 3);
        assert_eq!(cfg.max_fibers, 9);
        assert!(cfg.validate().is_ok());
    }
}
