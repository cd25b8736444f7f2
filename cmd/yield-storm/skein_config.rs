//! skein runtime configuration
//!
//! Usage:
//!   SKEIN_CONFIG_RS=$PWD/skein_config.rs cargo build
//!
//! Only the constants listed here change; everything else keeps the
//! library default. Environment variables still win at runtime:
//!   SKEIN_POOL_CAPACITY=0 ./yield-storm

// Stack size per fiber
pub const STACK_SIZE: usize = 256 * 1024;

// Completed fibers kept for reuse
pub const POOL_CAPACITY: usize = 128;

// Host loop sleep when idle (ms)
pub const IDLE_SLEEP_MS: u64 = 1;
