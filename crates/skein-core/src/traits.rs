//! Seams between the platform-agnostic core and the runtime
//!
//! [`Context`] abstracts the stackful execution context a fiber runs on,
//! and [`PhaseHandler`] is the hook interface libraries use to keep
//! per-fiber ambient state consistent across switches.

use crate::environment::Environment;
use crate::error::SchedResult;
use crate::id::FiberId;
use crate::state::Phase;

/// Outcome of switching into a context
#[derive(Debug, PartialEq, Eq)]
pub enum Switch<R> {
    /// The context gave control back and can be resumed later
    Suspended,
    /// The context ran to completion
    Completed(R),
}

/// A resumable execution context with its own stack.
pub trait Context {
    /// Value the body produces when it finishes
    type Exit;
    /// Stack released by [`Context::abort`] for reuse
    type Stack;

    /// Transfer control into the context.
    ///
    /// Returns once the context suspends itself or its body returns.
    fn switch_into(&mut self) -> Switch<Self::Exit>;

    /// Abandon the context and hand back its stack.
    ///
    /// A context that is suspended mid-body is discarded without running
    /// the rest of the body.
    fn abort(self) -> Option<Self::Stack>;
}

/// View of a fiber handed to phase handlers.
pub struct FiberRef<'a> {
    pub id: FiberId,
    pub is_program: bool,
    pub environment: &'a mut Environment,
}

/// Callback invoked on every phase transition of every fiber.
///
/// Handlers run while the scheduler holds its internal state and must not
/// call back into the runtime.
pub trait PhaseHandler {
    fn on_phase(&mut self, phase: Phase, fiber: FiberRef<'_>) -> SchedResult<()>;
}

impl<F> PhaseHandler for F
where
    F: FnMut(Phase, FiberRef<'_>) -> SchedResult<()>,
{
    fn on_phase(&mut self, phase: Phase, fiber: FiberRef<'_>) -> SchedResult<()> {
        self(phase, fiber)
    }
}
