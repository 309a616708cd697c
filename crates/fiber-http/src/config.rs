//! Client pool configuration

use fiber_core::env::env_get;

/// Initial request buffer capacity
pub const DEFAULT_REQUEST_CAPACITY: usize = 4096;
/// Initial response buffer capacity
pub const DEFAULT_RESPONSE_CAPACITY: usize = 4096;

/// Per-request buffer sizing.
///
/// Buffers grow on demand; these are only the starting capacities.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub request_capacity: usize,
    pub response_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl PoolConfig {
    /// Defaults with environment overrides.
    ///
    /// - `FIBER_HTTP_REQ_BUF` - initial request buffer bytes
    /// - `FIBER_HTTP_RESP_BUF` - initial response buffer bytes
    pub fn from_env() -> Self {
        Self {
            request_capacity: env_get("FIBER_HTTP_REQ_BUF", DEFAULT_REQUEST_CAPACITY),
            response_capacity: env_get("FIBER_HTTP_RESP_BUF", DEFAULT_RESPONSE_CAPACITY),
        }
    }

    pub fn request_capacity(mut self, bytes: usize) -> Self {
        self.request_capacity = bytes;
        self
    }

    pub fn response_capacity(mut self, bytes: usize) -> Self {
        self.response_capacity = bytes;
        self
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.request_capacity == 0 {
            return Err("request_capacity must be at least 1");
        }
        if self.response_capacity == 0 {
            return Err("response_capacity must be at least 1");
        }
        Ok(())
    }
}
