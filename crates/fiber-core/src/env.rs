//! Environment variable utilities
//!
//! Used by `RuntimeConfig::from_env` and `PoolConfig::from_env` to layer
//! `FIBER_*` overrides over built-in defaults.
//!
//! ```ignore
//! use fiber_core::env::{env_get, env_get_bool};
//!
//! let stack: usize = env_get("FIBER_STACK_SIZE", 256 * 1024);
//! let verbose = env_get_bool("FIBER_VERBOSE", false);
//! ```

use std::str::FromStr;

/// Get environment variable parsed as `T`, or return `default` when unset
/// or unparsable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as boolean.
///
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true; any other
/// value is false. Unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// `Some(T)` if the variable is set and parses.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__FIBER_TEST_UNSET__", 42);
        assert_eq!(val, 42);
        let val: Option<u16> = env_get_opt("__FIBER_TEST_UNSET__");
        assert!(val.is_none());
    }

    #[test]
    fn test_env_get_parses_and_falls_back() {
        std::env::set_var("__FIBER_TEST_NUM__", " 123 ");
        assert_eq!(env_get::<usize>("__FIBER_TEST_NUM__", 0), 123);

        std::env::set_var("__FIBER_TEST_NUM__", "lots");
        assert_eq!(env_get::<usize>("__FIBER_TEST_NUM__", 7), 7);
        std::env::remove_var("__FIBER_TEST_NUM__");
    }

    #[test]
    fn test_env_get_bool_variants() {
        for truthy in ["1", "true", "TRUE", "yes", "on"] {
            std::env::set_var("__FIBER_TEST_BOOL__", truthy);
            assert!(env_get_bool("__FIBER_TEST_BOOL__", false), "{}", truthy);
        }
        for falsy in ["0", "false", "garbage"] {
            std::env::set_var("__FIBER_TEST_BOOL__", falsy);
            assert!(!env_get_bool("__FIBER_TEST_BOOL__", true), "{}", falsy);
        }
        std::env::remove_var("__FIBER_TEST_BOOL__");
        assert!(env_get_bool("__FIBER_TEST_BOOL__", true));
    }
}
