use crate::error::check_delay;
use crate::events::{Event, EventQueue, Priority};
use crate::process::{Process, ProcessCore, Scope};
use crate::{Error, Result};

use std::cell::{Cell, RefCell};
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::ops::ControlFlow;
use std::rc::{Rc, Weak};

struct Shared {
    /// A priority queue of events that have been scheduled to execute, ordered by time, priority and insertion.
    queue: RefCell<EventQueue>,
    /// The simulation clock. Only ever moves forward.
    now: Cell<f64>,
    scopes_created: Cell<u64>,
    /// The process whose body is being polled right now, if any.
    active: RefCell<Option<Rc<ProcessCore>>>,
    running: Cell<bool>,
    /// First error returned by a process body during the current run.
    failure: RefCell<Option<Error>>,
}

/// Owns the virtual clock and the event queue, and drives the simulation loop.
///
/// The defining struct for a simulation in desproc. An [`Environment`] is a cheap, cloneable handle for a
/// single-threaded simulation: process bodies usually capture a clone to create timeouts and read the clock. Events,
/// processes and resources keep only a weak reference back to it.
///
/// The expected workflow for an Environment is:
///
/// 1. Create it with [`new()`] or [`with_start_time()`].
/// 2. Build resources and spawn at least one process with [`process()`], or schedule events directly.
/// 3. Call [`run()`] for a fixed amount of simulated time, [`run_until()`] to stop when a given event fires, or
///    [`run_all()`] to stop once nothing is left to do. Handle any error it might return.
/// 4. Inspect the clock, events and resources to process the results.
///
/// [`new()`]: Environment::new
/// [`with_start_time()`]: Environment::with_start_time
/// [`process()`]: Environment::process
/// [`run()`]: Environment::run
/// [`run_until()`]: Environment::run_until
/// [`run_all()`]: Environment::run_all
#[derive(Clone)]
pub struct Environment {
    shared: Rc<Shared>,
}

/// Weak back-reference held by events and resources.
#[derive(Clone)]
pub(crate) struct WeakEnvironment(Weak<Shared>);

impl WeakEnvironment {
    pub(crate) fn upgrade(&self) -> Result<Environment> {
        self.0
            .upgrade()
            .map(|shared| Environment { shared })
            .ok_or(Error::EnvironmentDropped)
    }
}

impl Environment {
    /// Initialize an environment with the clock set to zero.
    pub fn new() -> Self {
        Self {
            shared: Rc::new(Shared {
                queue: RefCell::new(EventQueue::default()),
                now: Cell::new(0.0),
                scopes_created: Cell::new(0),
                active: RefCell::new(None),
                running: Cell::new(false),
                failure: RefCell::new(None),
            }),
        }
    }

    /// Initialize an environment with the clock set to the provided starting time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `start_time` is negative or not finite.
    pub fn with_start_time(start_time: f64) -> Result<Self> {
        check_delay(start_time, "start time")?;
        let env = Self::new();
        env.shared.now.set(start_time);
        Ok(env)
    }

    /// Get the current clock time.
    pub fn now(&self) -> f64 {
        self.shared.now.get()
    }

    /// Place the provided event on the queue, due after its configured delay. Returns a clone of the handle for
    /// chaining.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyScheduled`] with no modifications to the queue if the event was scheduled before.
    pub fn schedule<E>(&self, event: &E) -> Result<E>
    where
        E: AsRef<Event> + Clone,
    {
        let now = self.now();
        let id = self.shared.queue.borrow_mut().schedule(event.as_ref(), now)?;
        tracing::trace!(%id, now, delay = event.as_ref().delay(), "event scheduled");
        Ok(event.clone())
    }

    /// Schedule several events at once, in iteration order.
    ///
    /// # Errors
    ///
    /// Stops at the first event that cannot be scheduled; events before it stay scheduled.
    pub fn schedule_all<'a, I>(&self, events: I) -> Result<Vec<Event>>
    where
        I: IntoIterator<Item = &'a Event>,
    {
        events.into_iter().map(|event| self.schedule(event)).collect()
    }

    /// Create and schedule an event that fires `delay` time units from now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `delay` is negative or not finite.
    pub fn timeout(&self, delay: f64) -> Result<Event> {
        self.schedule(&Event::with_delay(self, delay)?)
    }

    /// Build a process from `body` and schedule it to start now. Returns the event that fires once the body has
    /// returned, not the process itself, so "scheduled" can never be mistaken for "finished".
    ///
    /// # Errors
    ///
    /// Same as [`spawn()`](Environment::spawn), which cannot fail for a freshly built process.
    pub fn process<F, Fut>(&self, body: F) -> Result<Event>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result> + 'static,
    {
        self.spawn(&Process::new(self, body))
    }

    /// Schedule an already built process. Returns the event that fires once its body has returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyScheduled`] if the process was spawned before.
    pub fn spawn(&self, process: &Process) -> Result<Event> {
        self.schedule(process.start_event())?;
        Ok(process.finished().clone())
    }

    /// Schedule several processes at once. Returns their finished events in the same order.
    ///
    /// # Errors
    ///
    /// Stops at the first process that cannot be spawned; processes before it stay scheduled.
    pub fn spawn_all<'a, I>(&self, processes: I) -> Result<Vec<Event>>
    where
        I: IntoIterator<Item = &'a Process>,
    {
        processes.into_iter().map(|process| self.spawn(process)).collect()
    }

    /// Execute events for `delay` time units.
    ///
    /// A high-priority termination event is scheduled at `now + delay`, so it fires before any normal event due at
    /// the same time. Follows the same loop as [`run_until()`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `delay` is not strictly positive and finite, and otherwise the same
    /// errors as [`run_until()`].
    ///
    /// [`run_until()`]: Environment::run_until
    pub fn run(&self, delay: f64) -> Result {
        if delay <= 0.0 || !delay.is_finite() {
            return Err(Error::invalid(format!("run duration must be finite and positive, got {delay}")));
        }
        self.ensure_idle()?;

        let termination = self.schedule(&Event::with_priority(self, delay, Priority::High)?)?;
        self.run_loop(Some(&termination))
    }

    /// Execute events until `until` fires.
    ///
    /// A watcher process awaits `until` and then succeeds an internal high-priority termination event. Follows this
    /// loop:
    ///
    /// 1. Pop the earliest event. If there isn't one, return [`Error::EmptySchedule`].
    /// 2. Advance the clock to its due time and run its callbacks, which may schedule more events or resume
    ///    processes.
    /// 3. If a process body returned an error during those callbacks, return that error.
    /// 4. If the event was the termination event, return `Ok(())`. Otherwise go back to step 1.
    ///
    /// Since the watcher only waits, `until` must be scheduled by someone else; an event nobody schedules leads to
    /// [`Error::EmptySchedule`] once everything else has run.
    ///
    /// # Errors
    ///
    /// [`Error::EmptySchedule`] as described above, [`Error::AlreadyRunning`] when called from inside a run, any
    /// error returned by a process body, and [`Error::EventFailed`] if `until` was failed.
    pub fn run_until<E>(&self, until: &E) -> Result
    where
        E: AsRef<Event>,
    {
        self.ensure_idle()?;

        let termination = Event::with_priority(self, 0.0, Priority::High)?;
        let trigger = termination.clone();
        let watched = until.as_ref().clone();
        self.process(move |_| async move {
            watched.await?;
            trigger.succeed()
        })?;
        self.run_loop(Some(&termination))
    }

    /// Execute events until the queue drains. Unlike the other run methods, an empty queue is the normal way for this
    /// one to end.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyRunning`] when called from inside a run, or any error returned by a process body.
    pub fn run_all(&self) -> Result {
        self.ensure_idle()?;
        self.run_loop(None)
    }

    /// Pop and fire a single event, outside of any run. Process bodies resumed by that event count as being inside a
    /// run, so they cannot step or run the environment themselves.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRunning`] when called from inside a run, [`Error::EmptySchedule`] if the queue is empty,
    /// or the error of a process body that failed while the event's callbacks ran.
    pub fn step(&self) -> Result {
        self.ensure_idle()?;

        self.shared.running.set(true);
        let result = self.fire_next().map(drop);
        self.shared.running.set(false);
        result
    }

    /// Due time of the next event, if any.
    pub fn peek_time(&self) -> Option<f64> {
        self.shared.queue.borrow().peek_time()
    }

    /// Number of events waiting on the queue.
    pub fn pending_events(&self) -> usize {
        self.shared.queue.borrow().len()
    }

    /// Scope of the process whose body is executing right now, if any.
    pub fn active_scope(&self) -> Option<Scope> {
        self.shared.active.borrow().as_ref().map(|process| process.scope())
    }

    fn ensure_idle(&self) -> Result {
        if self.shared.running.get() {
            Err(Error::AlreadyRunning)
        } else {
            Ok(())
        }
    }

    fn run_loop(&self, termination: Option<&Event>) -> Result {
        self.shared.running.set(true);
        tracing::debug!(now = self.now(), "simulation started");

        let result = loop {
            match self.advance(termination) {
                Ok(ControlFlow::Continue(())) => {},
                Ok(ControlFlow::Break(())) => break Ok(()),
                Err(error) => break Err(error),
            }
        };

        self.shared.running.set(false);
        tracing::debug!(now = self.now(), ok = result.is_ok(), "simulation stopped");
        result
    }

    /// Fire one event and decide whether the loop is done. Without a termination event, draining the queue is done.
    fn advance(&self, termination: Option<&Event>) -> Result<ControlFlow<()>> {
        match (self.fire_next(), termination) {
            (Ok(fired), Some(termination)) if fired.ptr_eq(termination) => Ok(ControlFlow::Break(())),
            (Ok(_), _) => Ok(ControlFlow::Continue(())),
            (Err(Error::EmptySchedule), None) => Ok(ControlFlow::Break(())),
            (Err(error), _) => Err(error),
        }
    }

    fn fire_next(&self) -> Result<Event> {
        let Some((time, event)) = self.shared.queue.borrow_mut().next() else {
            return Err(Error::EmptySchedule);
        };

        self.shared.now.set(time);
        tracing::trace!(id = ?event.id(), now = time, "firing event");
        event.fire();

        match self.shared.failure.borrow_mut().take() {
            Some(error) => Err(error),
            None => Ok(event),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakEnvironment {
        WeakEnvironment(Rc::downgrade(&self.shared))
    }

    pub(crate) fn next_scope(&self) -> Scope {
        let raw = self.shared.scopes_created.get();
        self.shared.scopes_created.set(raw + 1);
        Scope::from_raw(raw)
    }

    pub(crate) fn active_process(&self) -> Option<Rc<ProcessCore>> {
        self.shared.active.borrow().clone()
    }

    /// Mark `process` as the one being polled. Returns whatever was active before.
    pub(crate) fn enter_process(&self, process: Rc<ProcessCore>) -> Option<Rc<ProcessCore>> {
        self.shared.active.replace(Some(process))
    }

    pub(crate) fn leave_process(&self, previous: Option<Rc<ProcessCore>>) {
        *self.shared.active.borrow_mut() = previous;
    }

    /// Keep the first failure; the loop reports it after the current event.
    pub(crate) fn record_failure(&self, error: Error) {
        let mut failure = self.shared.failure.borrow_mut();
        if failure.is_none() {
            *failure = Some(error);
        }
    }

}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Environment {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("now", &self.now())
            .field("pending_events", &self.pending_events())
            .field("running", &self.shared.running.get())
            .finish()
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Environment at time {} with {} scheduled events",
            self.now(),
            self.pending_events()
        )
    }
}
