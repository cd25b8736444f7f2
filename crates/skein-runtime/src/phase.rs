//! Registered phase handlers

use skein_core::{FiberRef, Phase, PhaseHandler, SchedResult};
use tracing::warn;

#[derive(Default)]
pub(crate) struct PhaseHooks {
    handlers: Vec<Box<dyn PhaseHandler>>,
}

impl PhaseHooks {
    pub fn register(&mut self, handler: Box<dyn PhaseHandler>) {
        self.handlers.push(handler);
    }

    /// Run every handler in registration order, stopping at the first failure.
    pub fn trigger(&mut self, phase: Phase, fiber: FiberRef<'_>) -> SchedResult<()> {
        let FiberRef {
            id,
            is_program,
            environment,
        } = fiber;
        for handler in self.handlers.iter_mut() {
            let fiber = FiberRef {
                id,
                is_program,
                environment: &mut *environment,
            };
            if let Err(err) = handler.on_phase(phase, fiber) {
                warn!(fiber = %id, %phase, %err, "phase handler failed");
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn drain(&mut self) -> Vec<Box<dyn PhaseHandler>> {
        std::mem::take(&mut self.handlers)
    }
}
