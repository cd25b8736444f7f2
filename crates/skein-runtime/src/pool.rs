//! Pool of finished fibers kept for reuse
//!
//! Reusing a fiber saves the stack mapping. Pooled fibers keep their stack
//! and nothing else; the stack is scrubbed before it runs a new body.

use skein_core::{Environment, SchedResult};
use tracing::trace;

use crate::fiber::Fiber;
use crate::memory::FiberStack;

pub(crate) struct FiberPool {
    idle: Vec<Fiber>,
    capacity: usize,
    stack_size: usize,
}

impl FiberPool {
    pub fn new(capacity: usize, stack_size: usize) -> Self {
        Self {
            idle: Vec::with_capacity(capacity),
            capacity,
            stack_size,
        }
    }

    /// Most recently released fiber, or a freshly mapped one.
    ///
    /// Either way the fiber comes back in state Unknown with an empty
    /// environment.
    pub fn acquire(&mut self) -> SchedResult<Fiber> {
        let mut fiber = match self.idle.pop() {
            Some(mut fiber) => {
                if let Some(stack) = fiber.stack.as_mut() {
                    stack.scrub()?;
                }
                trace!(pooled = self.idle.len(), "reusing pooled fiber");
                fiber
            }
            None => Fiber::with_stack(Some(FiberStack::new(self.stack_size)?)),
        };
        if fiber.stack.is_none() {
            fiber.stack = Some(FiberStack::new(self.stack_size)?);
        }
        fiber.environment = Some(Environment::new());
        Ok(fiber)
    }

    /// Take back a finished fiber. Dropped if the pool is full.
    pub fn release(&mut self, mut fiber: Fiber) {
        fiber.reset();
        if self.idle.len() < self.capacity && fiber.stack.is_some() {
            self.idle.push(fiber);
        }
    }

    pub fn len(&self) -> usize {
        self.idle.len()
    }

    pub fn drain(&mut self) -> Vec<Fiber> {
        std::mem::take(&mut self.idle)
    }
}
