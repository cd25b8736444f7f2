//! Runtime configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Environment variables (runtime)
//! 2. User's config file named by `SKEIN_CONFIG_RS` (compile-time)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use skein_runtime::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env()
//!     .stack_size(256 * 1024)
//!     .pool_capacity(16);
//! ```

pub mod defaults;

use std::fmt;
use std::time::Duration;

use skein_core::constants::MIN_STACK_SIZE;
use skein_core::env::{env_get, env_get_bool};
use skein_core::SchedError;
use thiserror::Error;

/// Runtime configuration with builder pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Stack size of every non-program fiber
    pub stack_size: usize,
    /// Completed fibers kept for reuse; 0 disables pooling
    pub pool_capacity: usize,
    /// Cap on live fibers, the program fiber included
    pub max_fibers: usize,
    /// Longest the host loop sleeps when nothing is ready
    pub idle_sleep: Duration,
    /// Emit per-switch trace events
    pub debug_logging: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RuntimeConfig {
    /// Compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `SKEIN_STACK_SIZE` - Stack size per fiber in bytes
    /// - `SKEIN_POOL_CAPACITY` - Idle fibers kept for reuse
    /// - `SKEIN_MAX_FIBERS` - Live fiber limit
    /// - `SKEIN_IDLE_SLEEP_MS` - Host loop idle sleep in milliseconds
    /// - `SKEIN_DEBUG` - Per-switch tracing (0/1)
    pub fn from_env() -> Self {
        Self {
            stack_size: env_get("SKEIN_STACK_SIZE", defaults::STACK_SIZE),
            pool_capacity: env_get("SKEIN_POOL_CAPACITY", defaults::POOL_CAPACITY),
            max_fibers: env_get("SKEIN_MAX_FIBERS", defaults::MAX_FIBERS),
            idle_sleep: Duration::from_millis(env_get(
                "SKEIN_IDLE_SLEEP_MS",
                defaults::IDLE_SLEEP_MS,
            )),
            debug_logging: env_get_bool("SKEIN_DEBUG", defaults::DEBUG_LOGGING),
        }
    }

    /// Compile-time defaults only, no environment lookups.
    pub fn new() -> Self {
        Self {
            stack_size: defaults::STACK_SIZE,
            pool_capacity: defaults::POOL_CAPACITY,
            max_fibers: defaults::MAX_FIBERS,
            idle_sleep: Duration::from_millis(defaults::IDLE_SLEEP_MS),
            debug_logging: defaults::DEBUG_LOGGING,
        }
    }

    // Builder methods

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn pool_capacity(mut self, cap: usize) -> Self {
        self.pool_capacity = cap;
        self
    }

    pub fn max_fibers(mut self, n: usize) -> Self {
        self.max_fibers = n;
        self
    }

    pub fn idle_sleep(mut self, d: Duration) -> Self {
        self.idle_sleep = d;
        self
    }

    pub fn debug_logging(mut self, enable: bool) -> Self {
        self.debug_logging = enable;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack_size < MIN_STACK_SIZE {
            return Err(ConfigError::InvalidValue("stack_size must be >= 64KB"));
        }
        if self.max_fibers < 2 {
            return Err(ConfigError::InvalidValue(
                "max_fibers must leave room beside the program fiber",
            ));
        }
        if self.pool_capacity >= self.max_fibers {
            return Err(ConfigError::InvalidValue(
                "pool_capacity must be < max_fibers",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Runtime Configuration:")?;
        writeln!(f, "  stack_size:     {}", self.stack_size)?;
        writeln!(f, "  pool_capacity:  {}", self.pool_capacity)?;
        writeln!(f, "  max_fibers:     {}", self.max_fibers)?;
        writeln!(f, "  idle_sleep:     {:?}", self.idle_sleep)?;
        write!(f, "  debug_logging:  {}", self.debug_logging)
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    InvalidValue(&'static str),
}

impl From<ConfigError> for SchedError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::InvalidValue(msg) => SchedError::InvalidConfig(msg),
        }
    }
}
