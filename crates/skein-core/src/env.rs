//! Environment variable helpers used by the config layer
//!
//! ```ignore
//! use skein_core::env::{env_get, env_get_bool};
//!
//! let stack: usize = env_get("SKEIN_STACK_SIZE", 2 * 1024 * 1024);
//! let debug = env_get_bool("SKEIN_DEBUG", false);
//! ```

use std::str::FromStr;

/// Parse `key` as `T`, falling back to `default` when unset or unparsable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Parse `key` as `T` if it is set and valid.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean flag: "1", "true", "yes", "on" are true, anything else set is false.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(
            val.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let v: usize = env_get("SKEIN_TEST_UNSET_SIZE_93817", 4096);
        assert_eq!(v, 4096);
        assert!(env_get_opt::<u64>("SKEIN_TEST_UNSET_SIZE_93817").is_none());
    }

    #[test]
    fn test_env_get_parses() {
        std::env::set_var("SKEIN_TEST_POOL_51223", " 12 ");
        let v: usize = env_get("SKEIN_TEST_POOL_51223", 0);
        assert_eq!(v, 12);
        std::env::remove_var("SKEIN_TEST_POOL_51223");
    }

    #[test]
    fn test_env_get_invalid_falls_back() {
        std::env::set_var("SKEIN_TEST_BAD_77120", "lots");
        let v: u32 = env_get("SKEIN_TEST_BAD_77120", 3);
        assert_eq!(v, 3);
        std::env::remove_var("SKEIN_TEST_BAD_77120");
    }

    #[test]
    fn test_env_get_bool() {
        std::env::set_var("SKEIN_TEST_FLAG_11802", "On");
        assert!(env_get_bool("SKEIN_TEST_FLAG_11802", false));
        std::env::set_var("SKEIN_TEST_FLAG_11802", "0");
        assert!(!env_get_bool("SKEIN_TEST_FLAG_11802", true));
        std::env::remove_var("SKEIN_TEST_FLAG_11802");
        assert!(env_get_bool("SKEIN_TEST_FLAG_11802", true));
    }
}
