//! Timers
//!
//! The runtime owns a [`TimerQueue`] driven by the host loop: each tick
//! fires the callbacks of every expired timer before the scheduling pass.
//! Fibers use it through `Runtime::sleep`; anything else that needs the
//! host's clock goes through the [`TimerService`] trait.
//!
//! ```text
//!   Runtime::sleep ──start()──► TimerQueue ──┐
//!                                   │        │ callbacks
//!   host loop tick ──fire_expired()─┘        ▼
//!                                    Runtime::awaken_resource
//! ```

mod entry;
mod heap;

pub use entry::{TimerEntry, TimerHandle, TimerMode};
pub use heap::TimerHeap;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::trace;

/// Callback run when a timer expires
pub type TimerCallback = Box<dyn FnMut()>;

/// Host timer facility
pub trait TimerService {
    /// Arm a timer; `on_timeout` runs each time it expires.
    fn start(&self, duration: Duration, mode: TimerMode, on_timeout: TimerCallback) -> TimerHandle;

    /// Disarm a timer. Returns true if it was still armed.
    fn cancel(&self, handle: TimerHandle) -> bool;
}

/// Single-threaded timer queue with callbacks.
///
/// Callbacks run with no internal borrow held, so they may start and
/// cancel timers, including their own.
#[derive(Default)]
pub struct TimerQueue {
    heap: RefCell<TimerHeap>,
    callbacks: RefCell<HashMap<TimerHandle, TimerCallback>>,
    started: Cell<u64>,
    fired: Cell<u64>,
    cancelled: Cell<u64>,
}

/// Counters kept by [`TimerQueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerStats {
    pub armed: usize,
    pub total_started: u64,
    pub total_fired: u64,
    pub total_cancelled: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the callbacks of every timer due at `now`. Returns how many fired.
    pub fn fire_expired(&self, now: Instant) -> usize {
        let expired = self.heap.borrow_mut().pop_expired(now);
        let mut fired = 0;

        for entry in expired {
            let Some(mut callback) = self.callbacks.borrow_mut().remove(&entry.handle) else {
                continue;
            };
            trace!(timer = entry.handle.raw(), "timer fired");
            callback();
            fired += 1;
            self.fired.set(self.fired.get() + 1);

            // Repeating timers keep their callback unless cancelled from inside it
            if entry.mode == TimerMode::Repeat && self.heap.borrow().is_live(entry.handle) {
                self.callbacks.borrow_mut().insert(entry.handle, callback);
            }
        }
        fired
    }

    pub fn stats(&self) -> TimerStats {
        TimerStats {
            armed: self.len(),
            total_started: self.started.get(),
            total_fired: self.fired.get(),
            total_cancelled: self.cancelled.get(),
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.borrow_mut().next_deadline()
    }

    pub fn len(&self) -> usize {
        self.heap.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.borrow().is_empty()
    }

    /// Disarm everything. Callbacks are dropped outside the internal borrow.
    pub fn clear(&self) {
        self.heap.borrow_mut().clear();
        let callbacks = std::mem::take(&mut *self.callbacks.borrow_mut());
        drop(callbacks);
    }
}

impl TimerService for TimerQueue {
    fn start(&self, duration: Duration, mode: TimerMode, on_timeout: TimerCallback) -> TimerHandle {
        let handle = self.heap.borrow_mut().insert(TimerEntry::new(duration, mode));
        self.callbacks.borrow_mut().insert(handle, on_timeout);
        self.started.set(self.started.get() + 1);
        handle
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        let was_live = self.heap.borrow_mut().cancel(handle);
        let callback = self.callbacks.borrow_mut().remove(&handle);
        drop(callback);
        if was_live {
            self.cancelled.set(self.cancelled.get() + 1);
        }
        was_live
    }
}
