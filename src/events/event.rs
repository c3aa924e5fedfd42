use crate::environment::{Environment, WeakEnvironment};
use crate::error::{check_delay, FailureReason};
use crate::{Error, Result};

use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Identifier assigned to an event when it is placed on the queue.
///
/// Identifiers come from a counter owned by each [`Environment`], starting at zero, so two fresh environments hand out
/// the same sequence. Among events due at the same time with the same [`Priority`], the lower identifier fires first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

impl EventId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw counter value behind this identifier.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tie-breaker between events due at the same time. [`High`] events fire before [`Normal`] ones.
///
/// [`High`]: Priority::High
/// [`Normal`]: Priority::Normal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    #[default]
    Normal,
    High,
}

/// Key for removing a callback again before its event fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CallbackId(u64);

type Callback = Box<dyn FnOnce(&Event)>;

struct EventState {
    id: Option<EventId>,
    scheduled_time: Option<f64>,
    triggered: bool,
    processed: bool,
    failure: Option<FailureReason>,
    callbacks: Vec<(CallbackId, Callback)>,
    callbacks_added: u64,
}

struct EventCore {
    env: WeakEnvironment,
    delay: f64,
    priority: Priority,
    state: RefCell<EventState>,
}

/// The atomic unit of scheduling.
///
/// An [`Event`] is a cheap handle; clones refer to the same underlying event. Each event carries the delay it will be
/// scheduled with, a [`Priority`], and an ordered list of callbacks that run, in registration order, when the
/// [`Environment`] pops it from the queue.
///
/// The lifecycle is strictly one-way:
///
/// 1. Created: neither scheduled, triggered nor processed.
/// 2. Scheduled: placed on the queue by [`Environment::schedule()`], [`succeed()`] or [`fail()`]. The absolute due
///    time and the [`EventId`] are assigned here.
/// 3. Triggered: popped from the queue, its callbacks are running.
/// 4. Processed: every callback registered before the event triggered has run.
///
/// An event fires exactly once. Firing is a point-in-time broadcast, so callbacks attached after the event has
/// triggered are never invoked.
///
/// Awaiting an event from inside a [`Process`](crate::Process) suspends the process until the event fires; the await
/// resolves to `Ok(())` on success or to [`Error::EventFailed`] if the event was failed.
///
/// [`succeed()`]: Event::succeed
/// [`fail()`]: Event::fail
#[derive(Clone)]
pub struct Event {
    core: Rc<EventCore>,
}

impl Event {
    /// Create an unscheduled event with no delay and [`Priority::Normal`].
    pub fn new(env: &Environment) -> Self {
        Self::build(env, 0.0, Priority::Normal)
    }

    /// Create an unscheduled event that will fire `delay` time units after it is scheduled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `delay` is negative or not finite.
    pub fn with_delay(env: &Environment, delay: f64) -> Result<Self> {
        Self::with_priority(env, delay, Priority::Normal)
    }

    /// Create an unscheduled event with both a delay and a priority.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `delay` is negative or not finite.
    pub fn with_priority(env: &Environment, delay: f64, priority: Priority) -> Result<Self> {
        check_delay(delay, "event delay")?;
        Ok(Self::build(env, delay, priority))
    }

    fn build(env: &Environment, delay: f64, priority: Priority) -> Self {
        Self {
            core: Rc::new(EventCore {
                env: env.downgrade(),
                delay,
                priority,
                state: RefCell::new(EventState {
                    id: None,
                    scheduled_time: None,
                    triggered: false,
                    processed: false,
                    failure: None,
                    callbacks: Vec::new(),
                    callbacks_added: 0,
                }),
            }),
        }
    }

    /// Schedule this event after its configured delay. The callbacks run later, from inside the event loop, never
    /// synchronously from this call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyScheduled`] if the event is already on its way, or [`Error::EnvironmentDropped`] if the
    /// owning environment no longer exists.
    pub fn succeed(&self) -> Result {
        self.environment()?.schedule(self).map(drop)
    }

    /// Schedule this event like [`succeed()`], but mark it as failed with the given reason. Every process awaiting a
    /// failed event resumes with [`Error::EventFailed`] carrying this reason.
    ///
    /// # Errors
    ///
    /// Same as [`succeed()`].
    ///
    /// [`succeed()`]: Event::succeed
    pub fn fail<E>(&self, reason: E) -> Result
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        self.fail_shared(Arc::from(reason.into()))
    }

    pub(crate) fn fail_shared(&self, reason: FailureReason) -> Result {
        self.environment()?.schedule(self)?;
        self.core.state.borrow_mut().failure = Some(reason);
        Ok(())
    }

    /// Register a callback to run with this event as its argument when the event fires. Callbacks run in the order
    /// they were appended.
    ///
    /// If the event has already triggered, the callback is dropped without ever running.
    pub fn append_callback<F>(&self, callback: F)
    where
        F: FnOnce(&Event) + 'static,
    {
        self.subscribe(callback, false);
    }

    /// Register a callback that runs before every callback registered so far. Resources use this so their own
    /// bookkeeping happens before any client continuation observes the event.
    pub fn prepend_callback<F>(&self, callback: F)
    where
        F: FnOnce(&Event) + 'static,
    {
        self.subscribe(callback, true);
    }

    pub(crate) fn subscribe<F>(&self, callback: F, front: bool) -> Option<CallbackId>
    where
        F: FnOnce(&Event) + 'static,
    {
        let mut state = self.core.state.borrow_mut();
        if state.triggered {
            tracing::debug!(id = ?state.id, "callback attached after the event triggered; it will never run");
            return None;
        }

        let key = CallbackId(state.callbacks_added);
        state.callbacks_added += 1;
        if front {
            state.callbacks.insert(0, (key, Box::new(callback)));
        } else {
            state.callbacks.push((key, Box::new(callback)));
        }
        Some(key)
    }

    pub(crate) fn unsubscribe(&self, key: CallbackId) -> bool {
        let mut state = self.core.state.borrow_mut();
        let before = state.callbacks.len();
        state.callbacks.retain(|(registered, _)| *registered != key);
        before != state.callbacks.len()
    }

    #[cfg(test)]
    pub(crate) fn callback_count(&self) -> usize {
        self.core.state.borrow().callbacks.len()
    }

    /// Record the queue placement. Fails if the event was placed before.
    pub(crate) fn mark_scheduled(&self, id: EventId, time: f64) -> Result {
        let mut state = self.core.state.borrow_mut();
        if let Some(existing) = state.id {
            return Err(Error::AlreadyScheduled(existing));
        }
        state.id = Some(id);
        state.scheduled_time = Some(time);
        Ok(())
    }

    /// Run every callback registered before this moment. Only the event loop calls this.
    pub(crate) fn fire(&self) {
        let callbacks = {
            let mut state = self.core.state.borrow_mut();
            state.triggered = true;
            std::mem::take(&mut state.callbacks)
        };
        for (_, callback) in callbacks {
            callback(self);
        }
        self.core.state.borrow_mut().processed = true;
    }

    /// `Ok(())` unless the event was failed. Only meaningful once the event has triggered.
    pub(crate) fn outcome(&self) -> Result {
        let state = self.core.state.borrow();
        match (&state.failure, state.id) {
            (Some(source), Some(id)) => Err(Error::EventFailed {
                id,
                source: Arc::clone(source),
            }),
            _ => Ok(()),
        }
    }

    pub(crate) fn failure(&self) -> Option<FailureReason> {
        self.core.state.borrow().failure.clone()
    }

    pub(crate) fn environment(&self) -> Result<Environment> {
        self.core.env.upgrade()
    }

    /// Identifier assigned when the event was scheduled.
    pub fn id(&self) -> Option<EventId> {
        self.core.state.borrow().id
    }

    /// Delay from scheduling to firing.
    pub fn delay(&self) -> f64 {
        self.core.delay
    }

    pub fn priority(&self) -> Priority {
        self.core.priority
    }

    /// Absolute time the event is due, once scheduled.
    pub fn scheduled_time(&self) -> Option<f64> {
        self.core.state.borrow().scheduled_time
    }

    pub fn is_scheduled(&self) -> bool {
        self.core.state.borrow().id.is_some()
    }

    pub fn is_triggered(&self) -> bool {
        self.core.state.borrow().triggered
    }

    pub fn is_processed(&self) -> bool {
        self.core.state.borrow().processed
    }

    pub fn is_failed(&self) -> bool {
        self.core.state.borrow().failure.is_some()
    }

    /// Whether both handles refer to the same event.
    pub fn ptr_eq(&self, other: &Event) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Event {}

impl AsRef<Event> for Event {
    fn as_ref(&self) -> &Event {
        self
    }
}

impl Debug for Event {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let state = self.core.state.borrow();
        f.debug_struct("Event")
            .field("id", &state.id)
            .field("delay", &self.core.delay)
            .field("priority", &self.core.priority)
            .field("scheduled_time", &state.scheduled_time)
            .field("triggered", &state.triggered)
            .field("processed", &state.processed)
            .field("failed", &state.failure.is_some())
            .field("callbacks", &state.callbacks.len())
            .finish()
    }
}

/// Future returned by awaiting an [`Event`].
///
/// On its first pending poll the future registers a continuation on the event that resumes the process currently
/// being polled. A process never needs a real waker: resumption always happens from inside the event loop when the
/// event fires.
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct EventFuture {
    event: Event,
    // resume generation of the process at registration time
    registered: Option<u64>,
}

impl Future for EventFuture {
    type Output = Result;

    fn poll(mut self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Self::Output> {
        if self.event.is_triggered() {
            return Poll::Ready(self.event.outcome());
        }

        let env = match self.event.environment() {
            Ok(env) => env,
            Err(error) => return Poll::Ready(Err(error)),
        };
        let Some(process) = env.active_process() else {
            return Poll::Ready(Err(Error::NotInProcess));
        };

        let generation = process.generation();
        if self.registered != Some(generation) {
            self.event.append_callback(move |_| process.wake(generation));
            self.registered = Some(generation);
        }
        Poll::Pending
    }
}

impl IntoFuture for Event {
    type Output = Result;
    type IntoFuture = EventFuture;

    fn into_future(self) -> Self::IntoFuture {
        EventFuture {
            event: self,
            registered: None,
        }
    }
}

impl IntoFuture for &Event {
    type Output = Result;
    type IntoFuture = EventFuture;

    fn into_future(self) -> Self::IntoFuture {
        self.clone().into_future()
    }
}
