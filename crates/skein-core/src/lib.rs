//! # skein-core
//!
//! Core types and traits for the skein cooperative fiber runtime.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Stacks, context switching and the scheduler itself live in
//! `skein-runtime`.
//!
//! ## Modules
//!
//! - `id` - Fiber ids, correlation events and resource keys
//! - `state` - Fiber states, wait reasons and lifecycle phases
//! - `environment` - Per-fiber key/value store
//! - `slot` - Generational arena fibers live in
//! - `error` - Error types
//! - `traits` - Execution context and phase handler traits
//! - `env` - Environment variable utilities

pub mod env;
pub mod environment;
pub mod error;
pub mod id;
pub mod slot;
pub mod state;
pub mod traits;

pub use env::{env_get, env_get_bool, env_get_opt};
pub use environment::Environment;
pub use error::{SchedError, SchedResult};
pub use id::{Event, FiberId, ResourceKey};
pub use slot::SlotArena;
pub use state::{FiberState, Phase, Wait, WaitKind};
pub use traits::{Context, FiberRef, PhaseHandler, Switch};

/// Defaults shared by the runtime and its config layer
pub mod constants {
    /// Default fiber stack size (2 MiB)
    pub const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

    /// Smallest stack the runtime accepts
    pub const MIN_STACK_SIZE: usize = 64 * 1024;

    /// Default cap on live fibers, the program fiber included
    pub const DEFAULT_MAX_FIBERS: usize = 65536;
}
