//! Cooperative fiber scheduler
//!
//! A [`Runtime`] multiplexes many fibers onto the calling thread. The
//! thread itself is represented by the *program fiber*; every other fiber
//! runs its body on its own stack and gives control back only by parking
//! (waiting on an event, a resource or a timer) or by finishing.
//!
//! ```text
//!                ┌──────────── schedule() ────────────┐
//!                │  scan registry front to back for   │
//!                │  the first Awaken fiber, switch in │
//!                └─────────────────┬──────────────────┘
//!                                  ▼
//!   spawn ──► Awaken ──► Active ──► wait ──► Suspended ──► awaken ──► Awaken
//!                          │                                            │
//!                          └──► Completed ──► Clean ──► pool            │
//!                          ▲                                            │
//!                          └────────────────────────────────────────────┘
//! ```
//!
//! Exactly one fiber is Active at any time. Parked fibers, and only
//! those, sit in the wait registry.

use std::any::Any;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use skein_core::{
    Context, Environment, Event, FiberId, FiberRef, FiberState, Phase, PhaseHandler,
    ResourceKey, SchedError, SchedResult, SlotArena, Switch, Wait,
};
use tracing::{debug, error, trace, warn};

use crate::config::RuntimeConfig;
use crate::context::{FiberContext, FiberExit};
use crate::fiber::{Fiber, PendingTimer};
use crate::phase::PhaseHooks;
use crate::pool::FiberPool;
use crate::registry::WaitRegistry;
use crate::snapshot::{FiberSnapshot, Snapshot};
use crate::source::EventSource;
use crate::timer::{TimerMode, TimerQueue, TimerService};

/// Handle to a single-threaded fiber runtime.
///
/// Cloning the handle is cheap; all clones drive the same runtime. Fiber
/// bodies typically capture a clone to wait, sleep and spawn.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<Inner>,
}

struct Inner {
    config: RuntimeConfig,
    state: RefCell<State>,
    /// Set for the duration of a scheduling pass
    scheduling: Cell<bool>,
    timers: TimerQueue,
    sources: RefCell<Vec<Rc<dyn EventSource>>>,
}

struct State {
    fibers: SlotArena<Fiber>,
    program: FiberId,
    current: FiberId,
    registry: WaitRegistry,
    pool: FiberPool,
    hooks: PhaseHooks,
    shut_down: bool,
}

impl State {
    fn fiber(&self, id: FiberId) -> SchedResult<&Fiber> {
        self.fibers.get(id).ok_or(SchedError::FiberNotFound(id))
    }

    fn fiber_mut(&mut self, id: FiberId) -> SchedResult<&mut Fiber> {
        self.fibers.get_mut(id).ok_or(SchedError::FiberNotFound(id))
    }

    fn trigger(&mut self, phase: Phase, id: FiberId) -> SchedResult<()> {
        let is_program = id == self.program;
        let fiber = self.fibers.get_mut(id).ok_or(SchedError::FiberNotFound(id))?;
        let environment = fiber.environment.get_or_insert_with(Environment::new);
        self.hooks.trigger(
            phase,
            FiberRef {
                id,
                is_program,
                environment,
            },
        )
    }

    /// First Suspended fiber, front to back, whose wait matches
    fn locate(&self, matches: impl Fn(&Wait) -> bool) -> Option<FiberId> {
        self.registry.find(|id| {
            self.fibers
                .get(id)
                .is_some_and(|f| f.state == FiberState::Suspended && matches(&f.wait))
        })
    }

    fn snapshot_of(&self, id: FiberId) -> Option<FiberSnapshot> {
        self.fibers.get(id).map(|f| FiberSnapshot {
            id,
            state: f.state,
            wait: f.wait,
            environment: f.environment.as_ref().map(Environment::keys).unwrap_or_default(),
            sleeping: f.timer.is_some(),
        })
    }
}

/// Clears the scheduling flag however the pass ends
struct SchedulingGuard<'a>(&'a Cell<bool>);

impl<'a> SchedulingGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        SchedulingGuard(flag)
    }
}

impl Drop for SchedulingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Runtime {
    /// Create a runtime whose program fiber is the calling thread.
    pub fn new(config: RuntimeConfig) -> SchedResult<Self> {
        config.validate()?;

        let mut fibers = SlotArena::new(config.max_fibers);
        let program = fibers.insert(Fiber::program())?;

        debug!(
            stack_size = config.stack_size,
            pool_capacity = config.pool_capacity,
            max_fibers = config.max_fibers,
            "runtime initialised"
        );

        let state = State {
            fibers,
            program,
            current: program,
            registry: WaitRegistry::new(),
            pool: FiberPool::new(config.pool_capacity, config.stack_size),
            hooks: PhaseHooks::default(),
            shut_down: false,
        };

        Ok(Self {
            inner: Rc::new(Inner {
                config,
                state: RefCell::new(state),
                scheduling: Cell::new(false),
                timers: TimerQueue::new(),
                sources: RefCell::new(Vec::new()),
            }),
        })
    }

    /// Runtime configured from compile-time defaults and the environment.
    pub fn from_env() -> SchedResult<Self> {
        Self::new(RuntimeConfig::from_env())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    // State access. Borrow failures mean a phase handler or environment
    // closure called back into the runtime.

    fn state(&self) -> SchedResult<Ref<'_, State>> {
        let state = self
            .inner
            .state
            .try_borrow()
            .map_err(|_| SchedError::Reentrant)?;
        if state.shut_down {
            return Err(SchedError::ShutDown);
        }
        Ok(state)
    }

    fn state_mut(&self) -> SchedResult<RefMut<'_, State>> {
        let state = self
            .inner
            .state
            .try_borrow_mut()
            .map_err(|_| SchedError::Reentrant)?;
        if state.shut_down {
            return Err(SchedError::ShutDown);
        }
        Ok(state)
    }

    /// Register a handler run on every phase transition of every fiber.
    pub fn register_phase_handler<H>(&self, handler: H) -> SchedResult<()>
    where
        H: PhaseHandler + 'static,
    {
        self.state_mut()?.hooks.register(Box::new(handler));
        Ok(())
    }

    /// Create a fiber running `body`.
    ///
    /// From the program fiber outside a scheduling pass the new fiber runs
    /// before this returns, until it first parks or finishes. Otherwise it
    /// is queued and runs later in the current pass.
    pub fn spawn<F>(&self, body: F) -> SchedResult<FiberId>
    where
        F: FnOnce() + 'static,
    {
        let id = {
            let mut guard = self.state_mut()?;
            let st = &mut *guard;
            if st.fibers.len() >= st.fibers.max() {
                return Err(SchedError::TooManyFibers(st.fibers.max()));
            }
            let mut fiber = st.pool.acquire()?;
            fiber.bind(body)?;
            fiber.state = FiberState::Awaken;
            let id = st.fibers.insert(fiber)?;
            st.registry.add(id);
            id
        };
        trace!(fiber = %id, "spawned");
        self.schedule_pending()?;
        Ok(id)
    }

    /// Run Awaken fibers until none is left.
    ///
    /// Must be called from the program fiber; calling it while a pass is
    /// already running fails with [`SchedError::Reentrant`].
    pub fn schedule(&self) -> SchedResult<()> {
        if self.inner.scheduling.get() {
            return Err(SchedError::Reentrant);
        }
        if self.state()?.registry.is_empty() {
            return Ok(());
        }

        let _guard = SchedulingGuard::enter(&self.inner.scheduling);
        while let Some(id) = self.next_awaken()? {
            self.dispatch(id)?;
        }
        Ok(())
    }

    /// Schedule now if that is allowed, otherwise leave it to the running pass.
    pub fn schedule_pending(&self) -> SchedResult<()> {
        if self.inner.scheduling.get() || !self.is_program() {
            return Ok(());
        }
        self.schedule()
    }

    fn next_awaken(&self) -> SchedResult<Option<FiberId>> {
        let st = self.state()?;
        Ok(st
            .registry
            .find(|id| st.fibers.get(id).is_some_and(|f| f.state.is_runnable())))
    }

    /// Switch from the program fiber into `id` and deal with how it came back.
    fn dispatch(&self, id: FiberId) -> SchedResult<()> {
        let mut context = {
            let mut guard = self.state_mut()?;
            let st = &mut *guard;
            st.registry.remove(id)?;

            let program = st.program;
            st.trigger(Phase::Save, program)?;
            let prog = st.fiber_mut(program)?;
            prog.state = FiberState::Suspended;
            prog.wait = Wait::Fiber;

            st.current = id;
            let fiber = st.fiber_mut(id)?;
            fiber.state = FiberState::Active;
            let first = !fiber.started;
            fiber.started = true;
            if first {
                st.trigger(Phase::Initialize, id)?;
            }
            st.trigger(Phase::Restore, id)?;

            st.fiber_mut(id)?
                .context
                .take()
                .ok_or(SchedError::InvalidState {
                    fiber: id,
                    state: FiberState::Active,
                })?
        };

        if self.inner.config.debug_logging {
            trace!(fiber = %id, "switching in");
        }
        let outcome = context.switch_into();
        self.check_returned(id, context, outcome)
    }

    /// Back on the program fiber after `id` parked or finished.
    fn check_returned(
        &self,
        id: FiberId,
        context: FiberContext,
        outcome: Switch<FiberExit>,
    ) -> SchedResult<()> {
        let finished = {
            let mut guard = self.state_mut()?;
            let st = &mut *guard;

            let finished = match outcome {
                Switch::Completed(exit) => {
                    if let Err(reason) = &exit {
                        warn!(fiber = %id, %reason, "fiber body panicked");
                    }
                    let fiber = st.fiber_mut(id)?;
                    fiber.state = FiberState::Completed;
                    fiber.stack = context.abort();
                    st.trigger(Phase::Clean, id)?;

                    if st.registry.contains(id) {
                        error!(fiber = %id, "completed fiber still registered");
                        return Err(SchedError::InvalidState {
                            fiber: id,
                            state: FiberState::Completed,
                        });
                    }
                    let mut fiber = st.fibers.remove(id).ok_or(SchedError::FiberNotFound(id))?;
                    let leftovers = (fiber.timer.take(), fiber.environment.take(), fiber.data.take());
                    st.pool.release(fiber);
                    if self.inner.config.debug_logging {
                        trace!(fiber = %id, pooled = st.pool.len(), "fiber completed");
                    }
                    Some(leftovers)
                }
                Switch::Suspended => {
                    let fiber = st.fiber_mut(id)?;
                    fiber.context = Some(context);
                    if fiber.state != FiberState::Suspended {
                        error!(fiber = %id, state = %fiber.state, "fiber yielded without parking");
                        return Err(SchedError::InvalidState {
                            fiber: id,
                            state: fiber.state,
                        });
                    }
                    None
                }
            };

            let program = st.program;
            st.current = program;
            let prog = st.fiber_mut(program)?;
            prog.state = FiberState::Active;
            prog.wait = Wait::None;
            st.trigger(Phase::Restore, program)?;
            finished
        };

        // Whatever the finished body left behind is dropped with no borrow held
        if let Some((timer, environment, data)) = finished {
            if let Some(handle) = timer.and_then(|t| t.handle) {
                self.inner.timers.cancel(handle);
            }
            drop(environment);
            drop(data);
        }
        Ok(())
    }

    /// Park the current fiber until it is awakened and rescheduled.
    fn park(&self, wait: Wait) -> SchedResult<Option<Box<dyn Any>>> {
        let (id, suspender) = {
            let mut guard = self.state_mut()?;
            let st = &mut *guard;
            let id = st.current;
            if id == st.program {
                return Err(SchedError::WaitFromProgram);
            }

            let fiber = st.fiber_mut(id)?;
            fiber.state = FiberState::Suspended;
            fiber.wait = wait;
            let suspender = fiber.suspender.clone();

            st.trigger(Phase::Save, id)?;
            st.registry.add(id);
            let program = st.program;
            st.fiber_mut(program)?.state = FiberState::Awaken;
            (id, suspender)
        };

        if self.inner.config.debug_logging {
            trace!(fiber = %id, %wait, "parking");
        }
        suspender.suspend()?;

        let mut guard = self.state_mut()?;
        let fiber = guard.fiber_mut(id)?;
        fiber.wait = Wait::None;
        Ok(fiber.data.take())
    }

    /// Park the current fiber until `event` is awakened.
    ///
    /// Returns whatever data the waker passed along.
    pub fn wait(&self, event: Event) -> SchedResult<Option<Box<dyn Any>>> {
        self.park(Wait::Event(event))
    }

    /// Park the current fiber until `key` is awakened.
    pub fn wait_resource(&self, key: ResourceKey) -> SchedResult<Option<Box<dyn Any>>> {
        self.park(Wait::Resource(key))
    }

    /// Mark the first fiber suspended on `event` as Awaken.
    ///
    /// The fiber stays registered and runs on the next scheduling pass.
    /// Returns false, dropping `data`, when nothing is waiting.
    pub fn awaken(&self, event: Event, data: Option<Box<dyn Any>>) -> bool {
        self.awaken_where(|w| w.is_event(event), data)
    }

    /// Mark the first fiber suspended on `key` as Awaken.
    pub fn awaken_resource(&self, key: ResourceKey) -> bool {
        self.awaken_where(|w| w.is_resource(key), None)
    }

    fn awaken_where(&self, matches: impl Fn(&Wait) -> bool, data: Option<Box<dyn Any>>) -> bool {
        let Ok(mut guard) = self.state_mut() else {
            return false;
        };
        let st = &mut *guard;
        let Some(id) = st.locate(matches) else {
            return false;
        };
        match st.fibers.get_mut(id) {
            Some(fiber) => {
                fiber.state = FiberState::Awaken;
                fiber.data = data;
                trace!(fiber = %id, "awakened");
                true
            }
            None => false,
        }
    }

    /// Fiber that would be awakened by `event`, if any.
    pub fn locate(&self, event: Event) -> Option<FiberId> {
        self.state().ok()?.locate(|w| w.is_event(event))
    }

    pub fn locate_resource(&self, key: ResourceKey) -> Option<FiberId> {
        self.state().ok()?.locate(|w| w.is_resource(key))
    }

    /// Park the current fiber for at least `duration`.
    pub fn sleep(&self, duration: Duration) -> SchedResult<()> {
        let key = {
            let mut guard = self.state_mut()?;
            let st = &mut *guard;
            let id = st.current;
            if id == st.program {
                return Err(SchedError::WaitFromProgram);
            }

            let mut pending = Box::new(PendingTimer { handle: None });
            let key = pending.key();
            let weak = Rc::downgrade(&self.inner);
            let handle = self.inner.timers.start(
                duration,
                TimerMode::Single,
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        Runtime { inner }.on_sleep_expired(id, key);
                    }
                }),
            );
            pending.handle = Some(handle);
            st.fiber_mut(id)?.timer = Some(pending);
            key
        };
        self.wait_resource(key).map(drop)
    }

    /// Let every other Awaken fiber run before continuing.
    pub fn yield_now(&self) -> SchedResult<()> {
        self.sleep(Duration::ZERO)
    }

    fn on_sleep_expired(&self, id: FiberId, key: ResourceKey) {
        if !self.awaken_resource(key) {
            warn!(fiber = %id, "sleep timer expired with no sleeping fiber");
        }
        let timer = self.state_mut().ok().and_then(|mut st| {
            st.fibers
                .get_mut(id)
                .filter(|f| f.timer.as_ref().is_some_and(|t| t.key() == key))
                .and_then(|f| f.timer.take())
        });
        drop(timer);
    }

    /// Poll `source` on every host loop tick.
    pub fn add_source(&self, source: Rc<dyn EventSource>) {
        self.inner.sources.borrow_mut().push(source);
    }

    /// One host loop tick: fire expired timers, poll sources, schedule.
    ///
    /// Returns the number of timers and source events handled.
    pub fn run_once(&self) -> SchedResult<usize> {
        if self.inner.scheduling.get() {
            return Err(SchedError::Reentrant);
        }
        let mut handled = self.inner.timers.fire_expired(Instant::now());

        let sources: Vec<Rc<dyn EventSource>> = self.inner.sources.borrow().clone();
        for source in sources {
            handled += source.poll();
        }

        self.schedule()?;
        Ok(handled)
    }

    /// Drive the host loop until `done` holds or `timeout` elapses.
    ///
    /// Returns whether `done` was satisfied. A timeout too large to add to
    /// the clock never elapses.
    pub fn run_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> SchedResult<bool> {
        let deadline = Instant::now().checked_add(timeout);
        self.schedule()?;
        loop {
            if done() {
                return Ok(true);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(false);
            }
            if self.run_once()? == 0 && !done() {
                self.idle(deadline);
            }
        }
    }

    /// Drive the host loop until no fiber is parked and no timer is armed.
    ///
    /// Gives up, with a warning, when fibers remain parked but nothing is
    /// left that could wake them.
    pub fn run(&self) -> SchedResult<()> {
        self.schedule()?;
        loop {
            let parked = self.state()?.registry.len();
            if parked == 0 && self.inner.timers.is_empty() {
                return Ok(());
            }
            if self.run_once()? == 0 {
                if self.inner.timers.is_empty() && self.inner.sources.borrow().is_empty() {
                    warn!(parked, "fibers parked with nothing left to wake them");
                    return Ok(());
                }
                self.idle(None);
            }
        }
    }

    fn idle(&self, limit: Option<Instant>) {
        let now = Instant::now();
        let mut nap = self.inner.config.idle_sleep;
        if let Some(next) = self.inner.timers.next_deadline() {
            nap = nap.min(next.saturating_duration_since(now));
        }
        if let Some(limit) = limit {
            nap = nap.min(limit.saturating_duration_since(now));
        }
        if !nap.is_zero() {
            std::thread::sleep(nap);
        }
    }

    /// Run `f` on the current fiber's environment.
    ///
    /// `f` must not call back into the runtime.
    pub fn with_environment<R>(&self, f: impl FnOnce(&mut Environment) -> R) -> SchedResult<R> {
        let mut guard = self.state_mut()?;
        let id = guard.current;
        let fiber = guard.fiber_mut(id)?;
        Ok(f(fiber.environment.get_or_insert_with(Environment::new)))
    }

    /// Tear the runtime down.
    ///
    /// Runs Clean for every parked fiber and the program fiber, then
    /// discards parked fibers without resuming them. Operations on the
    /// runtime fail with [`SchedError::ShutDown`] afterwards.
    pub fn teardown(&self) -> SchedResult<()> {
        if self.inner.scheduling.get() {
            return Err(SchedError::Reentrant);
        }

        let (fibers, pooled, hooks) = {
            let mut guard = self
                .inner
                .state
                .try_borrow_mut()
                .map_err(|_| SchedError::Reentrant)?;
            let st = &mut *guard;
            if st.shut_down {
                return Ok(());
            }

            let mut ids = st.registry.drain();
            ids.push(st.program);
            for id in ids {
                if let Err(err) = st.trigger(Phase::Clean, id) {
                    warn!(fiber = %id, %err, "clean failed during teardown");
                }
            }
            st.shut_down = true;
            (st.fibers.drain(), st.pool.drain(), st.hooks.drain())
        };

        self.inner.timers.clear();
        let sources = std::mem::take(&mut *self.inner.sources.borrow_mut());

        let discarded = fibers.len().saturating_sub(1);
        drop(sources);
        drop(hooks);
        drop(pooled);
        drop(fibers);
        debug!(discarded, "runtime torn down");
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.state.try_borrow().map_or(false, |st| st.shut_down)
    }

    // Introspection

    pub fn current(&self) -> FiberId {
        self.inner
            .state
            .try_borrow()
            .map_or(FiberId::NONE, |st| st.current)
    }

    pub fn program(&self) -> FiberId {
        self.inner
            .state
            .try_borrow()
            .map_or(FiberId::NONE, |st| st.program)
    }

    /// Whether the program fiber is the one running
    pub fn is_program(&self) -> bool {
        self.inner
            .state
            .try_borrow()
            .map_or(false, |st| st.current == st.program)
    }

    pub fn is_scheduling(&self) -> bool {
        self.inner.scheduling.get()
    }

    /// State of a live fiber; None once it has completed
    pub fn state_of(&self, id: FiberId) -> Option<FiberState> {
        self.state().ok()?.fibers.get(id).map(|f| f.state)
    }

    pub fn wait_of(&self, id: FiberId) -> Option<Wait> {
        self.state().ok()?.fibers.get(id).map(|f| f.wait)
    }

    /// Registry contents, front first
    pub fn waiting(&self) -> Vec<FiberId> {
        self.state()
            .map(|st| st.registry.iter().collect())
            .unwrap_or_default()
    }

    /// Live fibers, the program fiber included
    pub fn fiber_count(&self) -> usize {
        self.state().map_or(0, |st| st.fibers.len())
    }

    pub fn pooled(&self) -> usize {
        self.state().map_or(0, |st| st.pool.len())
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.timers.len()
    }

    pub fn snapshot(&self) -> SchedResult<Snapshot> {
        let st = self.state()?;
        let program = st
            .snapshot_of(st.program)
            .ok_or(SchedError::FiberNotFound(st.program))?;
        let waiting = st
            .registry
            .iter()
            .filter_map(|id| st.snapshot_of(id))
            .collect();
        Ok(Snapshot {
            scheduling: self.inner.scheduling.get(),
            current: st.current,
            program,
            waiting,
            pooled: st.pool.len(),
            timers: self.inner.timers.len(),
        })
    }

    /// Check the scheduler's structural invariants.
    ///
    /// Exactly one fiber is Active and it is the current one; a
    /// non-program fiber is registered iff it is Suspended or Awaken.
    pub fn verify(&self) -> SchedResult<()> {
        let st = self.state()?;
        let mut active = 0;
        for (id, fiber) in st.fibers.iter() {
            if fiber.state == FiberState::Active {
                active += 1;
                if id != st.current {
                    return Err(SchedError::InvalidState {
                        fiber: id,
                        state: fiber.state,
                    });
                }
            }
            if id != st.program && fiber.state.is_parked() != st.registry.contains(id) {
                return Err(SchedError::InvalidState {
                    fiber: id,
                    state: fiber.state,
                });
            }
        }
        if active != 1 {
            let current = st.fiber(st.current)?;
            return Err(SchedError::InvalidState {
                fiber: st.current,
                state: current.state,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.snapshot() {
            Ok(snapshot) => write!(f, "{}", snapshot),
            Err(err) => write!(f, "[Runtime] {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    const LIMIT: Duration = Duration::from_secs(5);

    fn runtime() -> Runtime {
        Runtime::new(RuntimeConfig::new().stack_size(128 * 1024)).unwrap()
    }

    fn pooled_runtime(capacity: usize) -> Runtime {
        Runtime::new(
            RuntimeConfig::new()
                .stack_size(128 * 1024)
                .pool_capacity(capacity),
        )
        .unwrap()
    }

    #[test]
    fn test_spawn_runs_to_completion() {
        let rt = runtime();
        let ran = Rc::new(Cell::new(false));
        let r = ran.clone();
        let id = rt.spawn(move || r.set(true)).unwrap();

        assert!(ran.get());
        assert_eq!(rt.state_of(id), None);
        assert_eq!(rt.fiber_count(), 1);
        assert!(rt.is_program());
        rt.verify().unwrap();
    }

    #[test]
    fn test_wait_from_program_fails() {
        let rt = runtime();
        assert_eq!(
            rt.wait(Event::generate()).err(),
            Some(SchedError::WaitFromProgram)
        );
        assert_eq!(rt.sleep(Duration::ZERO), Err(SchedError::WaitFromProgram));
        assert!(rt.waiting().is_empty());
    }

    #[test]
    fn test_schedule_reentry_fails() {
        let rt = runtime();
        let seen = Rc::new(RefCell::new(None));
        let (r, s) = (rt.clone(), seen.clone());
        rt.spawn(move || *s.borrow_mut() = Some(r.schedule())).unwrap();
        assert_eq!(*seen.borrow(), Some(Err(SchedError::Reentrant)));
    }

    #[test]
    fn test_schedule_with_empty_registry() {
        let rt = runtime();
        rt.schedule().unwrap();
        assert_eq!(rt.run_once().unwrap(), 0);
    }

    #[test]
    fn test_wait_and_awaken_with_data() {
        let rt = runtime();
        let event = Event::generate();
        let got = Rc::new(RefCell::new(None));
        let (r, g) = (rt.clone(), got.clone());
        let id = rt
            .spawn(move || {
                let data = r.wait(event).unwrap();
                *g.borrow_mut() = data.and_then(|d| d.downcast::<u32>().ok()).map(|d| *d);
            })
            .unwrap();

        assert_eq!(rt.state_of(id), Some(FiberState::Suspended));
        assert_eq!(rt.wait_of(id), Some(Wait::Event(event)));
        assert_eq!(rt.locate(event), Some(id));

        assert!(rt.awaken(event, Some(Box::new(5u32))));
        // Awaken only flips the state; nothing runs until the next pass
        assert_eq!(rt.state_of(id), Some(FiberState::Awaken));
        assert!(got.borrow().is_none());
        rt.verify().unwrap();

        rt.schedule().unwrap();
        assert_eq!(*got.borrow(), Some(5));
        assert_eq!(rt.state_of(id), None);
    }

    #[test]
    fn test_awaken_without_waiter() {
        let rt = runtime();
        assert!(!rt.awaken(Event::generate(), None));
        assert!(!rt.awaken_resource(ResourceKey::from_raw(0x1000)));
    }

    #[test]
    fn test_awaken_matches_suspended_only() {
        let rt = runtime();
        let event = Event::generate();
        let r = rt.clone();
        rt.spawn(move || {
            r.wait(event).unwrap();
        })
        .unwrap();

        assert!(rt.awaken(event, None));
        assert!(!rt.awaken(event, None));
        rt.schedule().unwrap();
        assert_eq!(rt.fiber_count(), 1);
    }

    #[test]
    fn test_wait_resource() {
        let rt = runtime();
        let resource = 0u8;
        let key = ResourceKey::of(&resource);
        let done = Rc::new(Cell::new(false));
        let (r, d) = (rt.clone(), done.clone());
        rt.spawn(move || {
            r.wait_resource(key).unwrap();
            d.set(true);
        })
        .unwrap();

        assert!(!rt.awaken(Event::from_raw(key.as_usize() as u64), None));
        assert_eq!(rt.locate_resource(key), rt.waiting().first().copied());
        assert!(rt.awaken_resource(key));
        rt.schedule().unwrap();
        assert!(done.get());
    }

    #[test]
    fn test_newest_parked_resumes_first() {
        let rt = runtime();
        let log = Rc::new(RefCell::new(Vec::new()));
        let (e1, e2) = (Event::generate(), Event::generate());

        for (name, event) in [("a", e1), ("b", e2)] {
            let (r, l) = (rt.clone(), log.clone());
            rt.spawn(move || {
                r.wait(event).unwrap();
                l.borrow_mut().push(name);
            })
            .unwrap();
        }

        assert!(rt.awaken(e1, None));
        assert!(rt.awaken(e2, None));
        rt.schedule().unwrap();
        assert_eq!(*log.borrow(), vec!["b", "a"]);
    }

    #[test]
    fn test_resume_order_follows_awaken_order() {
        // Waiters on k1 and k2; k2 is answered first
        for first in ["a", "b"] {
            let rt = runtime();
            let log = Rc::new(RefCell::new(Vec::new()));
            let (k1, k2) = (Event::generate(), Event::generate());
            let order = if first == "a" {
                [("a", k1), ("b", k2)]
            } else {
                [("b", k2), ("a", k1)]
            };
            for (name, event) in order {
                let (r, l) = (rt.clone(), log.clone());
                rt.spawn(move || {
                    r.wait(event).unwrap();
                    l.borrow_mut().push(name);
                })
                .unwrap();
            }

            assert!(rt.awaken(k2, None));
            rt.schedule().unwrap();
            assert!(rt.awaken(k1, None));
            rt.schedule().unwrap();
            assert_eq!(*log.borrow(), vec!["b", "a"]);
        }
    }

    #[test]
    fn test_nested_spawn_runs_in_same_pass() {
        let rt = runtime();
        let log = Rc::new(RefCell::new(Vec::new()));
        let (r, l) = (rt.clone(), log.clone());
        rt.spawn(move || {
            let l2 = l.clone();
            r.spawn(move || l2.borrow_mut().push("child")).unwrap();
            l.borrow_mut().push("parent");
        })
        .unwrap();

        assert_eq!(*log.borrow(), vec!["parent", "child"]);
        assert_eq!(rt.fiber_count(), 1);
    }

    #[test]
    fn test_phase_order() {
        let rt = runtime();
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        rt.register_phase_handler(move |phase: Phase, fiber: FiberRef<'_>| {
            l.borrow_mut().push((phase, fiber.is_program));
            Ok(())
        })
        .unwrap();

        let event = Event::generate();
        let r = rt.clone();
        rt.spawn(move || {
            r.wait(event).unwrap();
        })
        .unwrap();

        assert_eq!(
            std::mem::take(&mut *log.borrow_mut()),
            vec![
                (Phase::Save, true),
                (Phase::Initialize, false),
                (Phase::Restore, false),
                (Phase::Save, false),
                (Phase::Restore, true),
            ]
        );

        rt.awaken(event, None);
        rt.schedule().unwrap();
        assert_eq!(
            *log.borrow(),
            vec![
                (Phase::Save, true),
                (Phase::Restore, false),
                (Phase::Clean, false),
                (Phase::Restore, true),
            ]
        );
    }

    #[test]
    fn test_restore_only_handler_sees_first_activation() {
        let rt = runtime();
        let restored = Rc::new(RefCell::new(Vec::new()));
        let r = restored.clone();
        rt.register_phase_handler(move |phase: Phase, fiber: FiberRef<'_>| {
            if phase == Phase::Restore && !fiber.is_program {
                r.borrow_mut().push(fiber.id);
            }
            Ok(())
        })
        .unwrap();

        let id = rt.spawn(|| {}).unwrap();
        assert_eq!(*restored.borrow(), vec![id]);
    }

    #[test]
    fn test_run_until_unbounded_timeout() {
        let rt = runtime();
        assert!(rt.run_until(Duration::MAX, || true).unwrap());

        let ticks = Rc::new(Cell::new(0));
        let t = ticks.clone();
        assert!(rt
            .run_until(Duration::MAX, || {
                t.set(t.get() + 1);
                t.get() > 3
            })
            .unwrap());
    }

    #[test]
    fn test_unbounded_sleep_parks() {
        let rt = runtime();
        let woke = Rc::new(Cell::new(false));
        let (r, w) = (rt.clone(), woke.clone());
        let id = rt
            .spawn(move || {
                if r.sleep(Duration::MAX).is_ok() {
                    w.set(true);
                }
            })
            .unwrap();

        assert_eq!(rt.fiber_count(), 2);
        assert!(matches!(rt.wait_of(id), Some(Wait::Resource(_))));
        assert_eq!(rt.pending_timers(), 1);
        assert!(!rt.run_until(Duration::from_millis(10), || woke.get()).unwrap());
        assert!(!woke.get());
        rt.teardown().unwrap();
    }

    #[test]
    fn test_environment_survives_switches() {
        let rt = runtime();
        let seen = Rc::new(Cell::new(0u32));
        let (r, s) = (rt.clone(), seen.clone());
        rt.spawn(move || {
            r.with_environment(|env| env.store("depth", 7u32)).unwrap();
            r.yield_now().unwrap();
            let depth = r
                .with_environment(|env| env.load::<u32>("depth").copied())
                .unwrap();
            s.set(depth.unwrap_or(0));
        })
        .unwrap();

        rt.with_environment(|env| assert!(!env.contains("depth")))
            .unwrap();
        assert!(rt.run_until(LIMIT, || seen.get() != 0).unwrap());
        assert_eq!(seen.get(), 7);
    }

    #[test]
    fn test_pool_reuse_gives_empty_environment() {
        let rt = pooled_runtime(1);
        let r = rt.clone();
        rt.spawn(move || {
            r.with_environment(|env| env.store("stale", true)).unwrap();
        })
        .unwrap();
        assert_eq!(rt.pooled(), 1);

        let leaked = Rc::new(Cell::new(true));
        let (r, l) = (rt.clone(), leaked.clone());
        rt.spawn(move || {
            l.set(r.with_environment(|env| env.contains("stale")).unwrap());
        })
        .unwrap();
        assert!(!leaked.get());
        assert_eq!(rt.pooled(), 1);
    }

    #[test]
    fn test_sleep_waits_at_least_duration() {
        let rt = runtime();
        let woke = Rc::new(Cell::new(None));
        let (r, w) = (rt.clone(), woke.clone());
        let start = Instant::now();
        let id = rt
            .spawn(move || {
                r.sleep(Duration::from_millis(20)).unwrap();
                w.set(Some(Instant::now()));
            })
            .unwrap();

        assert_eq!(rt.pending_timers(), 1);
        assert!(matches!(rt.wait_of(id), Some(Wait::Resource(_))));
        assert!(rt.run_until(LIMIT, || woke.get().is_some()).unwrap());
        let elapsed = woke.get().map(|t| t - start).unwrap_or_default();
        assert!(elapsed >= Duration::from_millis(20));
        assert_eq!(rt.pending_timers(), 0);
    }

    #[test]
    fn test_yield_with_sole_fiber() {
        let rt = runtime();
        let rounds = Rc::new(Cell::new(0));
        let (r, n) = (rt.clone(), rounds.clone());
        rt.spawn(move || {
            for _ in 0..3 {
                r.yield_now().unwrap();
                n.set(n.get() + 1);
            }
        })
        .unwrap();

        assert!(rt.run_until(LIMIT, || rounds.get() == 3).unwrap());
        assert_eq!(rt.fiber_count(), 1);
    }

    #[test]
    fn test_yield_is_fair() {
        let rt = runtime();
        let log = Rc::new(RefCell::new(Vec::new()));
        for id in 0..3u8 {
            let (r, l) = (rt.clone(), log.clone());
            rt.spawn(move || {
                for _ in 0..4 {
                    l.borrow_mut().push(id);
                    r.verify().unwrap();
                    r.yield_now().unwrap();
                }
            })
            .unwrap();
        }

        assert!(rt.run_until(LIMIT, || rt.fiber_count() == 1).unwrap());
        let log = log.borrow();
        assert_eq!(log.len(), 12);
        for round in log.chunks(3) {
            let mut ids = round.to_vec();
            ids.sort_unstable();
            assert_eq!(ids, vec![0, 1, 2]);
        }
    }

    #[test]
    fn test_registry_invariant_under_churn() {
        let rt = runtime();
        let events: Vec<Event> = (0..8).map(|_| Event::generate()).collect();
        for event in events.iter().copied() {
            let r = rt.clone();
            rt.spawn(move || {
                r.verify().unwrap();
                r.wait(event).unwrap();
                r.verify().unwrap();
            })
            .unwrap();
            rt.verify().unwrap();
        }
        assert_eq!(rt.waiting().len(), 8);

        for event in events.iter().rev().step_by(2) {
            assert!(rt.awaken(*event, None));
            rt.verify().unwrap();
        }
        rt.schedule().unwrap();
        rt.verify().unwrap();
        assert_eq!(rt.waiting().len(), 4);
    }

    #[test]
    fn test_panicking_fiber_is_cleaned_up() {
        let rt = pooled_runtime(2);
        let id = rt.spawn(|| panic!("fiber failure")).unwrap();
        assert_eq!(rt.state_of(id), None);
        assert_eq!(rt.pooled(), 1);

        let ran = Rc::new(Cell::new(false));
        let r = ran.clone();
        rt.spawn(move || r.set(true)).unwrap();
        assert!(ran.get());
    }

    #[test]
    fn test_fiber_limit() {
        let rt = Runtime::new(
            RuntimeConfig::new()
                .stack_size(128 * 1024)
                .max_fibers(3),
        )
        .unwrap();
        for _ in 0..2 {
            let r = rt.clone();
            rt.spawn(move || {
                r.wait(Event::generate()).unwrap();
            })
            .unwrap();
        }
        assert_eq!(rt.spawn(|| {}), Err(SchedError::TooManyFibers(3)));
    }

    #[test]
    fn test_failing_phase_handler_surfaces() {
        let rt = runtime();
        rt.register_phase_handler(|phase: Phase, fiber: FiberRef<'_>| {
            if phase == Phase::Initialize && !fiber.is_program {
                Err(SchedError::phase(phase, "refused"))
            } else {
                Ok(())
            }
        })
        .unwrap();
        assert_eq!(
            rt.spawn(|| {}),
            Err(SchedError::phase(Phase::Initialize, "refused"))
        );
    }

    #[test]
    fn test_snapshot() {
        let rt = runtime();
        let event = Event::generate();
        let r = rt.clone();
        let id = rt
            .spawn(move || {
                r.with_environment(|env| env.store("tag", 1u8)).unwrap();
                r.wait(event).unwrap();
            })
            .unwrap();

        let snapshot = rt.snapshot().unwrap();
        assert_eq!(snapshot.current, rt.program());
        assert_eq!(snapshot.program.state, FiberState::Active);
        assert_eq!(snapshot.waiting.len(), 1);
        assert_eq!(snapshot.waiting[0].id, id);
        assert_eq!(snapshot.waiting[0].environment, vec!["tag".to_string()]);

        let text = format!("{:?}", rt);
        assert!(text.contains("[Waiting]"));
        assert!(text.contains(&format!("event {}", event)));
    }

    #[test]
    fn test_teardown() {
        let rt = runtime();
        let cleaned = Rc::new(Cell::new(0));
        let c = cleaned.clone();
        rt.register_phase_handler(move |phase: Phase, _: FiberRef<'_>| {
            if phase == Phase::Clean {
                c.set(c.get() + 1);
            }
            Ok(())
        })
        .unwrap();

        let resumed = Rc::new(Cell::new(false));
        let (r, res) = (rt.clone(), resumed.clone());
        rt.spawn(move || {
            let _ = r.wait(Event::generate());
            res.set(true);
        })
        .unwrap();
        let r = rt.clone();
        rt.spawn(move || {
            let _ = r.sleep(Duration::from_secs(60));
        })
        .unwrap();

        rt.teardown().unwrap();
        // Two parked fibers plus the program fiber
        assert_eq!(cleaned.get(), 3);
        assert!(!resumed.get());
        assert!(rt.is_shut_down());
        assert_eq!(rt.pending_timers(), 0);
        assert_eq!(rt.spawn(|| {}), Err(SchedError::ShutDown));
        assert!(!rt.awaken(Event::generate(), None));
        rt.teardown().unwrap();
    }
}
