//! Stackful execution contexts
//!
//! Each non-program fiber runs its body on a [`FiberContext`], a
//! corosensei coroutine over a [`FiberStack`]. Switching is symmetric in
//! effect but always routed through the scheduler: the scheduler resumes
//! a context, and the context suspends back to whoever resumed it.
//!
//! ```text
//!   program fiber (scheduler)              fiber context
//!   ─────────────────────────              ─────────────
//!   switch_into() ───── resume ──────────► body runs
//!                                           │
//!         ◄──────────── suspend ─────────── Suspender::suspend()
//!   (scheduler picks next)                  │
//!   switch_into() ───── resume ──────────► returns from suspend()
//!         ◄──────────── return ──────────── body finishes
//! ```

use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::rc::Rc;

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use skein_core::{Context, SchedError, SchedResult, Switch};

use crate::memory::FiberStack;

/// How a fiber body ended: `Err` carries the panic message.
pub type FiberExit = Result<(), String>;

type FiberCoroutine = Coroutine<(), (), FiberExit, DefaultStack>;

/// Handle a running body uses to give control back to the scheduler.
///
/// Filled in by the coroutine on entry and cleared when the body ends.
#[derive(Clone, Default)]
pub(crate) struct Suspender {
    yielder: Rc<Cell<Option<NonNull<Yielder<(), ()>>>>>,
}

impl Suspender {
    fn attach(&self, yielder: &Yielder<(), ()>) {
        self.yielder.set(Some(NonNull::from(yielder)));
    }

    fn detach(&self) {
        self.yielder.set(None);
    }

    /// Suspend the calling context until it is next resumed.
    ///
    /// Must be called from inside the context this suspender belongs to.
    pub(crate) fn suspend(&self) -> SchedResult<()> {
        let Some(yielder) = self.yielder.get() else {
            return Err(SchedError::Stack("suspend outside a running context".into()));
        };
        // SAFETY: the pointer is set by the coroutine body on entry and
        // cleared before it returns, so it refers to the live Yielder of
        // the context we are running on.
        unsafe { yielder.as_ref().suspend(()) };
        Ok(())
    }
}

/// Coroutine a fiber body runs on
pub struct FiberContext {
    coroutine: Option<FiberCoroutine>,
    stack_size: usize,
}

impl FiberContext {
    pub(crate) fn new<F>(stack: FiberStack, suspender: Suspender, body: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        let stack_size = stack.size();
        let coroutine = Coroutine::with_stack(
            stack.into_inner(),
            move |yielder: &Yielder<(), ()>, ()| {
                suspender.attach(yielder);
                let exit = panic::catch_unwind(AssertUnwindSafe(body)).map_err(panic_message);
                suspender.detach();
                exit
            },
        );
        Self {
            coroutine: Some(coroutine),
            stack_size,
        }
    }

    /// Whether the body has been entered at least once
    pub fn started(&self) -> bool {
        self.coroutine.as_ref().is_some_and(|c| c.started())
    }

    fn discard(coroutine: &mut FiberCoroutine) {
        if coroutine.started() && !coroutine.done() {
            // SAFETY: the runtime keeps no references into a fiber's stack
            // other than the yielder pointer, which dies with the body.
            // Values the body still owns are leaked rather than dropped.
            unsafe { coroutine.force_reset() };
        }
    }
}

impl Context for FiberContext {
    type Exit = FiberExit;
    type Stack = FiberStack;

    fn switch_into(&mut self) -> Switch<FiberExit> {
        let Some(coroutine) = self.coroutine.as_mut() else {
            return Switch::Completed(Err("context already aborted".into()));
        };
        match coroutine.resume(()) {
            CoroutineResult::Yield(()) => Switch::Suspended,
            CoroutineResult::Return(exit) => Switch::Completed(exit),
        }
    }

    fn abort(mut self) -> Option<FiberStack> {
        let stack_size = self.stack_size;
        self.coroutine.take().map(|mut coroutine| {
            Self::discard(&mut coroutine);
            FiberStack::from_inner(coroutine.into_stack(), stack_size)
        })
    }
}

impl Drop for FiberContext {
    fn drop(&mut self) {
        if let Some(coroutine) = self.coroutine.as_mut() {
            Self::discard(coroutine);
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn stack() -> FiberStack {
        FiberStack::new(64 * 1024).unwrap()
    }

    #[test]
    fn test_switch_and_complete() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let suspender = Suspender::default();
        let mut ctx = {
            let log = log.clone();
            let s = suspender.clone();
            FiberContext::new(stack(), suspender, move || {
                log.borrow_mut().push(1);
                s.suspend().unwrap();
                log.borrow_mut().push(2);
            })
        };

        assert!(!ctx.started());
        assert_eq!(ctx.switch_into(), Switch::Suspended);
        assert_eq!(*log.borrow(), vec![1]);
        assert_eq!(ctx.switch_into(), Switch::Completed(Ok(())));
        assert_eq!(*log.borrow(), vec![1, 2]);
        assert!(ctx.abort().is_some());
    }

    #[test]
    fn test_panic_is_captured() {
        let mut ctx = FiberContext::new(stack(), Suspender::default(), || panic!("boom"));
        assert_eq!(ctx.switch_into(), Switch::Completed(Err("boom".into())));
    }

    #[test]
    fn test_abort_suspended_returns_stack() {
        let suspender = Suspender::default();
        let s = suspender.clone();
        let mut ctx = FiberContext::new(stack(), suspender, move || {
            s.suspend().unwrap();
            unreachable!("aborted contexts never resume");
        });
        assert_eq!(ctx.switch_into(), Switch::Suspended);
        let stack = ctx.abort().unwrap();
        assert_eq!(stack.size(), 64 * 1024);
    }

    #[test]
    fn test_suspend_outside_context() {
        assert!(Suspender::default().suspend().is_err());
    }
}
