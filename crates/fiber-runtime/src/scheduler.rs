//! Single-threaded fiber scheduler
//!
//! One OS thread, many fibers. The thread that calls [`Scheduler::run`] (or
//! [`Scheduler::turn`]) is the *main context*: it alone resumes fibers, and a
//! fiber only ever switches back to it. Fibers suspend explicitly with
//! [`Scheduler::park`] when an operation would block and are resumed when
//! the reactor reports readiness on a descriptor they service, or when
//! another fiber calls [`Scheduler::wake`].
//!
//! Readiness is dispatched one event at a time: the parked fiber bound to
//! the event's descriptor is resumed immediately, and
//! [`Scheduler::last_event`] tells it what happened.
//!
//! No `RefCell` borrow is ever held across a context switch.

use crate::arch::{self, SavedRegs};
use crate::config::RuntimeConfig;
use crate::limits::fd_limit;
use crate::pool::FiberPool;
use crate::reactor::{Event, Interest, Reactor};

use fiber_core::{FiberId, FiberState, RuntimeError, RuntimeResult};

use std::cell::{Cell, RefCell, UnsafeCell};
use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, error, trace, warn};

/// Cooperative scheduler bound to one thread.
pub struct Scheduler {
    pool: RefCell<FiberPool>,
    reactor: RefCell<Reactor>,
    ready: RefCell<VecDeque<FiberId>>,
    /// fd -> fiber servicing it, sized to the descriptor limit
    fd_fibers: RefCell<Vec<FiberId>>,
    current: Cell<FiberId>,
    last_event: Cell<Event>,
    /// Non-daemon fibers spawned and not yet finished
    live: Cell<usize>,
    main_regs: UnsafeCell<SavedRegs>,
    config: RuntimeConfig,
}

impl Scheduler {
    /// Create a scheduler: fiber pool, epoll instance and fd table.
    pub fn new(config: RuntimeConfig) -> RuntimeResult<Rc<Self>> {
        config.validate().map_err(RuntimeError::InvalidConfig)?;

        let pool = FiberPool::new(
            config.initial_fibers,
            config.grow_fibers,
            config.stack_size,
            config.max_fibers,
        )?;
        let reactor = Reactor::new(config.events_per_poll).map_err(RuntimeError::Reactor)?;
        let limit = fd_limit()?;

        debug!(fd_limit = limit, ?config, "scheduler created");

        Ok(Rc::new(Self {
            pool: RefCell::new(pool),
            reactor: RefCell::new(reactor),
            ready: RefCell::new(VecDeque::new()),
            fd_fibers: RefCell::new(vec![FiberId::NONE; limit]),
            current: Cell::new(FiberId::NONE),
            last_event: Cell::new(Event::NONE),
            live: Cell::new(0),
            main_regs: UnsafeCell::new(SavedRegs::default()),
            config,
        }))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Spawn a fiber. It is queued, not run; it first runs on the next
    /// `turn`/`run` iteration.
    pub fn spawn<F>(&self, f: F) -> RuntimeResult<FiberId>
    where
        F: FnOnce() + 'static,
    {
        self.spawn_inner(Box::new(f), false)
    }

    /// Spawn a fiber that does not keep [`Scheduler::run`] alive.
    pub fn spawn_daemon<F>(&self, f: F) -> RuntimeResult<FiberId>
    where
        F: FnOnce() + 'static,
    {
        self.spawn_inner(Box::new(f), true)
    }

    fn spawn_inner(&self, task: crate::pool::Task, daemon: bool) -> RuntimeResult<FiberId> {
        let mut pool = self.pool.borrow_mut();
        let id = pool.acquire()?;
        let Some(unit) = pool.unit_mut(id) else {
            return Err(RuntimeError::NoSlotsAvailable);
        };

        let top = unit.stack.top();
        unsafe {
            arch::init_context(&mut unit.regs, top, fiber_main, self as *const Scheduler as usize);
        }
        unit.task = Some(task);
        unit.daemon = daemon;
        unit.state = FiberState::Ready;
        drop(pool);

        if !daemon {
            self.live.set(self.live.get() + 1);
        }
        self.ready.borrow_mut().push_back(id);
        trace!(fiber = %id, daemon, "spawned");
        Ok(id)
    }

    /// The fiber now running, if called from inside one
    #[inline]
    pub fn current(&self) -> Option<FiberId> {
        self.current.get().to_option()
    }

    #[inline]
    pub fn in_fiber(&self) -> bool {
        self.current.get().is_some()
    }

    /// The event that resumed the current fiber, or `Event::NONE` if it was
    /// resumed for another reason.
    #[inline]
    pub fn last_event(&self) -> Event {
        self.last_event.get()
    }

    /// Non-daemon fibers still alive
    #[inline]
    pub fn live_fibers(&self) -> usize {
        self.live.get()
    }

    pub fn fiber_state(&self, id: FiberId) -> Option<FiberState> {
        self.pool.borrow().unit(id).map(|u| u.state())
    }

    /// Suspend the current fiber until an event arrives for a descriptor it
    /// services, or until [`Scheduler::wake`].
    pub fn park(&self) -> RuntimeResult<()> {
        self.suspend(FiberState::Parked)
    }

    /// Requeue the current fiber behind every other ready fiber.
    pub fn yield_now(&self) -> RuntimeResult<()> {
        self.suspend(FiberState::Ready)
    }

    fn suspend(&self, state: FiberState) -> RuntimeResult<()> {
        let id = self.current.get();
        if id.is_none() {
            return Err(RuntimeError::NotInFiber);
        }

        let regs = {
            let mut pool = self.pool.borrow_mut();
            let unit = pool.unit_mut(id).ok_or(RuntimeError::NotInFiber)?;
            unit.state = state;
            &mut unit.regs as *mut SavedRegs
        };

        unsafe { arch::context_switch(regs, self.main_regs.get()) };
        // Resumed by the main context
        Ok(())
    }

    /// Make a parked fiber ready. Returns false if it was not parked.
    pub fn wake(&self, id: FiberId) -> bool {
        let woke = {
            let mut pool = self.pool.borrow_mut();
            match pool.unit_mut(id) {
                Some(unit) if unit.state == FiberState::Parked => {
                    unit.state = FiberState::Ready;
                    true
                }
                _ => false,
            }
        };
        if woke {
            self.ready.borrow_mut().push_back(id);
            trace!(fiber = %id, "woken");
        }
        woke
    }

    /// Register `fd` with the reactor (edge-triggered).
    pub fn register(&self, fd: RawFd, interest: Interest) -> RuntimeResult<()> {
        self.check_fd(fd)?;
        self.reactor.borrow().register(fd, interest).map_err(RuntimeError::Reactor)
    }

    /// Remove `fd` from the reactor and forget its fiber.
    pub fn deregister(&self, fd: RawFd) -> RuntimeResult<()> {
        self.clear_fd_fiber(fd);
        self.reactor.borrow().deregister(fd).map_err(RuntimeError::Reactor)
    }

    /// Route readiness on `fd` to fiber `id`.
    pub fn set_fd_fiber(&self, fd: RawFd, id: FiberId) -> RuntimeResult<()> {
        let idx = self.check_fd(fd)?;
        self.fd_fibers.borrow_mut()[idx] = id;
        Ok(())
    }

    pub fn clear_fd_fiber(&self, fd: RawFd) {
        if let Ok(idx) = self.check_fd(fd) {
            self.fd_fibers.borrow_mut()[idx] = FiberId::NONE;
        }
    }

    pub fn fd_fiber(&self, fd: RawFd) -> Option<FiberId> {
        let idx = self.check_fd(fd).ok()?;
        self.fd_fibers.borrow()[idx].to_option()
    }

    /// Size of the descriptor table
    pub fn fd_limit(&self) -> usize {
        self.fd_fibers.borrow().len()
    }

    fn check_fd(&self, fd: RawFd) -> RuntimeResult<usize> {
        let limit = self.fd_fibers.borrow().len();
        match usize::try_from(fd) {
            Ok(idx) if idx < limit => Ok(idx),
            _ => Err(RuntimeError::FdOutOfRange { fd, limit }),
        }
    }

    /// Drive fibers until no non-daemon fiber is alive.
    pub fn run(&self) -> RuntimeResult<()> {
        while self.live.get() > 0 {
            self.step(None, true)?;
        }
        debug!("run complete");
        Ok(())
    }

    /// One iteration: run every ready fiber, wait for readiness (at most
    /// `timeout`, not at all if fibers are ready) and dispatch it.
    ///
    /// Returns the number of fiber resumptions.
    pub fn turn(&self, timeout: Option<Duration>) -> RuntimeResult<usize> {
        self.step(timeout, false)
    }

    /// With `until_idle`, skip the wait once the last non-daemon fiber has
    /// finished: daemons and idle descriptors alone never end a blocking wait.
    fn step(&self, timeout: Option<Duration>, until_idle: bool) -> RuntimeResult<usize> {
        if self.in_fiber() {
            return Err(RuntimeError::InFiber);
        }

        let mut resumed = self.run_ready();
        if until_idle && self.live.get() == 0 {
            return Ok(resumed);
        }

        let timeout = if self.ready.borrow().is_empty() { timeout } else { Some(Duration::ZERO) };
        let mut events = Vec::new();
        self.reactor
            .borrow_mut()
            .poll(timeout, &mut events)
            .map_err(RuntimeError::Reactor)?;

        for event in events {
            let Some(id) = self.fd_fiber(event.fd) else {
                trace!(fd = event.fd, mask = event.mask, "event for unbound fd");
                continue;
            };
            if self.fiber_state(id) != Some(FiberState::Parked) {
                // Edge-triggered: a fiber that is not parked retries its I/O
                // before parking again, so nothing is lost.
                continue;
            }
            self.last_event.set(event);
            self.resume(id);
            resumed += 1;
            resumed += self.run_ready();
        }

        Ok(resumed)
    }

    /// Resume the fibers ready now. Fibers readied meanwhile (yielded,
    /// woken or spawned) wait for the next pass.
    fn run_ready(&self) -> usize {
        let batch = self.ready.borrow().len();
        let mut n = 0;
        while n < batch {
            let next = self.ready.borrow_mut().pop_front();
            let Some(id) = next else { break };
            self.last_event.set(Event::NONE);
            self.resume(id);
            n += 1;
        }
        n
    }

    /// Switch from the main context into fiber `id` and handle whatever
    /// state it comes back in.
    fn resume(&self, id: FiberId) {
        let regs = {
            let mut pool = self.pool.borrow_mut();
            let Some(unit) = pool.unit_mut(id) else {
                warn!(fiber = %id, "resume of unknown fiber");
                return;
            };
            unit.state = FiberState::Running;
            &unit.regs as *const SavedRegs
        };

        self.current.set(id);
        unsafe { arch::context_switch(self.main_regs.get(), regs) };
        self.current.set(FiberId::NONE);

        let (state, daemon) = match self.pool.borrow().unit(id) {
            Some(unit) => (unit.state(), unit.is_daemon()),
            None => return,
        };

        match state {
            FiberState::Finished => {
                self.pool.borrow_mut().release(id);
                if !daemon {
                    self.live.set(self.live.get().saturating_sub(1));
                }
                trace!(fiber = %id, "finished");
            }
            FiberState::Ready => self.ready.borrow_mut().push_back(id),
            FiberState::Parked => {}
            other => warn!(fiber = %id, state = ?other, "unexpected state after switch"),
        }
    }

    /// Runs on the fiber's own stack: take the task, run it, then leave for
    /// good.
    fn run_current(&self) {
        let id = self.current.get();
        let task = self.pool.borrow_mut().unit_mut(id).and_then(|u| u.task.take());
        if let Some(task) = task {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic".into());
                error!(fiber = %id, panic = %msg, "fiber panicked");
            }
        }
    }

    /// Mark the current fiber finished and switch away for the last time.
    fn exit_current(&self) -> ! {
        let id = self.current.get();
        let regs = {
            let mut pool = self.pool.borrow_mut();
            match pool.unit_mut(id) {
                Some(unit) => {
                    unit.state = FiberState::Finished;
                    &mut unit.regs as *mut SavedRegs
                }
                None => std::process::abort(),
            }
        };
        unsafe { arch::context_switch(regs, self.main_regs.get()) };
        unreachable!("finished fiber {} was resumed", id);
    }
}

/// Entry point of every fiber; `arg` is the owning scheduler.
extern "C" fn fiber_main(arg: usize) {
    let sched = unsafe { &*(arg as *const Scheduler) };
    sched.run_current();
    sched.exit_current()
}
