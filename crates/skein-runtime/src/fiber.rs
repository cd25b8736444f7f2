//! Fiber record kept in the runtime's arena

use std::any::Any;

use skein_core::{Environment, FiberState, ResourceKey, SchedError, SchedResult, Wait};

use crate::context::{FiberContext, Suspender};
use crate::memory::FiberStack;
use crate::timer::TimerHandle;

/// Sleep timer a fiber is parked on.
///
/// Boxed so its address is stable; that address is the resource key the
/// fiber waits on.
pub(crate) struct PendingTimer {
    pub handle: Option<TimerHandle>,
}

impl PendingTimer {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::of(self)
    }
}

pub(crate) struct Fiber {
    pub state: FiberState,
    pub wait: Wait,
    /// Present from acquisition until the fiber is released
    pub environment: Option<Environment>,
    pub timer: Option<Box<PendingTimer>>,
    /// Handed over by Awaken, picked up when the wait returns
    pub data: Option<Box<dyn Any>>,
    /// Bound body; None for the program fiber and between bodies
    pub context: Option<FiberContext>,
    /// Stack waiting to be bound to the next body
    pub stack: Option<FiberStack>,
    pub suspender: Suspender,
    /// Set on first activation; Initialize runs once before the first Restore
    pub started: bool,
}

impl Fiber {
    /// The fiber standing for the host's own thread of control
    pub fn program() -> Self {
        Self {
            state: FiberState::Active,
            environment: Some(Environment::new()),
            started: true,
            ..Self::with_stack(None)
        }
    }

    pub fn with_stack(stack: Option<FiberStack>) -> Self {
        Self {
            state: FiberState::Unknown,
            wait: Wait::None,
            environment: None,
            timer: None,
            data: None,
            context: None,
            stack,
            suspender: Suspender::default(),
            started: false,
        }
    }

    /// Bind `body` to this fiber's stack.
    pub fn bind<F>(&mut self, body: F) -> SchedResult<()>
    where
        F: FnOnce() + 'static,
    {
        let stack = self
            .stack
            .take()
            .ok_or_else(|| SchedError::Stack("fiber has no stack to bind".into()))?;
        self.suspender = Suspender::default();
        self.context = Some(FiberContext::new(stack, self.suspender.clone(), body));
        self.started = false;
        Ok(())
    }

    /// Return to the pristine pooled shape, keeping only the stack.
    pub fn reset(&mut self) {
        self.state = FiberState::Unknown;
        self.wait = Wait::None;
        self.environment = None;
        self.timer = None;
        self.data = None;
        self.context = None;
        self.started = false;
    }
}
