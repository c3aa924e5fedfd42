use crate::environment::Environment;
use crate::error::FailureReason;
use crate::events::{Event, EventFuture};
use crate::Result;

use futures::future::{FutureExt, LocalBoxFuture};
use std::cell::{Cell, RefCell};
use std::fmt::{Debug, Formatter};
use std::future::{Future, IntoFuture};
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Identity of a process body.
///
/// A scope is handed to the closure that builds a process body and stays valid for the whole life of the process.
/// Resources use it to decide who may act on them, see [`Server::server_action()`](crate::Server::server_action).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scope(u64);

impl Scope {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "process-{}", self.0)
    }
}

type Body = LocalBoxFuture<'static, Result>;

pub(crate) struct ProcessCore {
    scope: Scope,
    start: Event,
    finished: Event,
    body: RefCell<Option<Body>>,
    alive: Cell<bool>,
    processed: Cell<bool>,
    // bumped on every poll so that stale continuations are ignored
    generation: Cell<u64>,
    created_at: f64,
    started_at: Cell<Option<f64>>,
}

impl ProcessCore {
    pub(crate) fn scope(&self) -> Scope {
        self.scope
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.get()
    }

    /// Continuation registered on every awaited event.
    pub(crate) fn wake(self: &Rc<Self>, generation: u64) {
        if generation == self.generation.get() {
            self.resume();
        }
    }

    fn begin(self: &Rc<Self>) {
        self.alive.set(true);
        if let Ok(env) = self.start.environment() {
            self.started_at.set(Some(env.now()));
        }
        tracing::debug!(scope = %self.scope, "process started");
        self.resume();
    }

    /// Poll the body once. Runs until the body awaits an event that has not fired yet, or until it returns.
    fn resume(self: &Rc<Self>) {
        let Some(mut body) = self.body.borrow_mut().take() else {
            return;
        };
        let Ok(env) = self.start.environment() else {
            return;
        };

        self.generation.set(self.generation.get() + 1);
        let previous = env.enter_process(Rc::clone(self));
        let mut context = Context::from_waker(futures::task::noop_waker_ref());
        let poll = body.as_mut().poll(&mut context);
        env.leave_process(previous);

        match poll {
            Poll::Pending => *self.body.borrow_mut() = Some(body),
            Poll::Ready(result) => self.complete(&env, result),
        }
    }

    fn complete(&self, env: &Environment, result: Result) {
        self.alive.set(false);
        self.processed.set(true);

        let scheduled = match result {
            Ok(()) => {
                tracing::debug!(scope = %self.scope, now = env.now(), "process finished");
                self.finished.succeed()
            },
            Err(error) => {
                tracing::warn!(scope = %self.scope, now = env.now(), %error, "process body returned an error");
                let reason: FailureReason = Arc::new(error.clone());
                env.record_failure(error);
                self.finished.fail_shared(reason)
            },
        };
        if let Err(error) = scheduled {
            tracing::warn!(scope = %self.scope, %error, "could not schedule the finished event");
        }
    }
}

/// A suspendable unit of simulation logic.
///
/// A process wraps an `async` body built from a closure that receives the process [`Scope`]. The body runs inside the
/// event loop, one slice at a time: every `.await` on an [`Event`], a [`ValueEvent`](crate::ValueEvent) or a
/// condition suspends the body until that event fires, and the firing resumes it right where it left off. Nothing
/// runs in parallel, so bodies may freely share `Rc<RefCell<_>>` state.
///
/// The process starts when its start event fires, which happens after [`Environment::spawn()`] (or
/// [`Environment::process()`]) schedules it. When the body returns, the process stops being alive, becomes processed,
/// and its [`finished()`] event succeeds. Awaiting a `&Process`, or the event returned by
/// [`Environment::process()`], waits for that moment, which is how processes compose into sub-processes.
///
/// A body that returns an error fails the finished event with that error and halts the current run, which returns
/// the same error.
///
/// Only futures built from this crate's events can suspend a process: the body is polled without a real waker.
///
/// [`finished()`]: Process::finished
#[derive(Clone)]
pub struct Process {
    core: Rc<ProcessCore>,
}

impl Process {
    /// Build a process that starts as soon as it is spawned.
    pub fn new<F, Fut>(env: &Environment, body: F) -> Self
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result> + 'static,
    {
        Self::build(env, Event::new(env), body)
    }

    /// Build a process that starts `delay` time units after it is spawned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`](crate::Error::InvalidConfiguration) if `delay` is negative or not
    /// finite.
    pub fn with_delay<F, Fut>(env: &Environment, delay: f64, body: F) -> Result<Self>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result> + 'static,
    {
        Ok(Self::build(env, Event::with_delay(env, delay)?, body))
    }

    fn build<F, Fut>(env: &Environment, start: Event, body: F) -> Self
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result> + 'static,
    {
        let scope = env.next_scope();
        let core = Rc::new(ProcessCore {
            scope,
            start,
            finished: Event::new(env),
            body: RefCell::new(Some(body(scope).boxed_local())),
            alive: Cell::new(false),
            processed: Cell::new(false),
            generation: Cell::new(0),
            created_at: env.now(),
            started_at: Cell::new(None),
        });

        let starter = Rc::clone(&core);
        core.start.append_callback(move |_| starter.begin());
        Self { core }
    }

    pub fn scope(&self) -> Scope {
        self.core.scope
    }

    /// True from the first resumption until the body returns.
    pub fn is_alive(&self) -> bool {
        self.core.alive.get()
    }

    /// Whether the process has started.
    pub fn is_triggered(&self) -> bool {
        self.core.start.is_triggered()
    }

    /// Whether the body has returned.
    pub fn is_processed(&self) -> bool {
        self.core.processed.get()
    }

    /// The event that fires once the body has returned.
    pub fn finished(&self) -> &Event {
        &self.core.finished
    }

    /// Clock value when the process was built.
    pub fn created_at(&self) -> f64 {
        self.core.created_at
    }

    /// Clock value when the body first ran, or `None` if the process has not started yet. Differs from
    /// [`created_at()`](Process::created_at) for processes built with a start delay.
    pub fn started_at(&self) -> Option<f64> {
        self.core.started_at.get()
    }

    pub(crate) fn start_event(&self) -> &Event {
        &self.core.start
    }
}

impl Debug for Process {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("scope", &self.core.scope)
            .field("alive", &self.core.alive.get())
            .field("processed", &self.core.processed.get())
            .field("start", &self.core.start)
            .field("finished", &self.core.finished)
            .finish()
    }
}

impl IntoFuture for &Process {
    type Output = Result;
    type IntoFuture = EventFuture;

    fn into_future(self) -> Self::IntoFuture {
        self.finished().into_future()
    }
}
