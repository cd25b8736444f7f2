//! Error types for the fiber scheduler

use thiserror::Error;

use crate::id::FiberId;
use crate::state::{FiberState, Phase};

/// Result type for scheduler operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur in scheduler operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedError {
    /// The program fiber may not park; only scheduled fibers can wait
    #[error("unable to wait while in the program fiber")]
    WaitFromProgram,

    /// Schedule() was entered while a scheduling pass was running
    #[error("scheduler is already running")]
    Reentrant,

    /// Operation must be issued from the program fiber
    #[error("operation must be issued from the program fiber")]
    NotFromProgram,

    /// A fiber was found in a state the operation does not allow
    #[error("fiber {fiber} in unexpected state {state}")]
    InvalidState { fiber: FiberId, state: FiberState },

    #[error("fiber {0} not found")]
    FiberNotFound(FiberId),

    #[error("fiber limit of {0} reached")]
    TooManyFibers(usize),

    /// A registered phase handler refused a transition
    #[error("{phase} handler failed: {reason}")]
    Phase { phase: Phase, reason: String },

    /// Stack allocation or recycling failed
    #[error("stack error: {0}")]
    Stack(String),

    #[error("runtime has been torn down")]
    ShutDown,

    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

impl SchedError {
    /// Convenience for phase handlers rejecting a transition.
    pub fn phase(phase: Phase, reason: impl Into<String>) -> Self {
        SchedError::Phase {
            phase,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            format!("{}", SchedError::WaitFromProgram),
            "unable to wait while in the program fiber"
        );
        let e = SchedError::InvalidState {
            fiber: FiberId::new(2, 0),
            state: FiberState::Completed,
        };
        assert_eq!(format!("{}", e), "fiber 2.0 in unexpected state completed");
        let e = SchedError::phase(Phase::Save, "no room");
        assert_eq!(format!("{}", e), "Save handler failed: no room");
    }
}
