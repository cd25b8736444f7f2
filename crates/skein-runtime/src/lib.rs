//! # skein-runtime
//!
//! Single-threaded runtime for skein fibers.
//!
//! This crate provides:
//! - Fiber stacks (mmap with a guard page, scrubbed on reuse)
//! - Stackful context switching on top of corosensei
//! - The cooperative scheduler and its wait registry
//! - A timer queue driving `sleep` and `yield_now`
//! - A host loop polling timers and readiness sources

pub mod config;
pub mod context;
pub mod memory;
pub mod scheduler;
pub mod snapshot;
pub mod source;
pub mod timer;

mod fiber;
mod phase;
mod pool;
mod registry;

// Re-exports
pub use config::{ConfigError, RuntimeConfig};
pub use context::{FiberContext, FiberExit};
pub use memory::FiberStack;
pub use scheduler::Runtime;
pub use snapshot::{FiberSnapshot, Snapshot};
pub use source::EventSource;
pub use timer::{TimerHandle, TimerMode, TimerQueue, TimerService, TimerStats};
