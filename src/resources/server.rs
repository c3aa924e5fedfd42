use crate::environment::{Environment, WeakEnvironment};
use crate::events::{Event, ValueEvent, WeakValue};
use crate::process::Scope;
use crate::{Error, Result};

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Granted, but the request event has not fired yet.
    Pending,
    /// The holder has observed the grant.
    Held,
    /// A release was requested and has not fired yet.
    Releasing,
}

struct Grant {
    // weak, since the granted value is a handle on this server
    request: WeakValue<Server>,
    scope: Scope,
    phase: Phase,
}

#[derive(Default)]
struct ServerState {
    grant: Option<Grant>,
    queue: VecDeque<(ValueEvent<Server>, Scope)>,
}

struct ServerCore {
    env: WeakEnvironment,
    state: RefCell<ServerState>,
}

/// A mutual exclusion resource.
///
/// At most one process holds the server at any time. [`request()`] returns a [`ValueEvent`] that fires once the
/// requesting scope is granted the server, carrying the server itself as its value. Requests made while the server is
/// blocked wait in a queue and are granted strictly in the order they were made.
///
/// [`release()`] hands the server back. When the release fires, the holder's request event is expired and the oldest
/// waiting request, if any, is granted in the same step, so the server never sits idle between two contenders.
///
/// [`server_action()`] guards work that only the current holder may start. Wrapping the server in a domain type and
/// exposing its operations through `server_action` is the intended way to model machines, runways, clerks and the like.
///
/// [`request()`]: Server::request
/// [`release()`]: Server::release
/// [`server_action()`]: Server::server_action
#[derive(Clone)]
pub struct Server {
    core: Rc<ServerCore>,
}

impl Server {
    pub fn new(env: &Environment) -> Self {
        Self {
            core: Rc::new(ServerCore {
                env: env.downgrade(),
                state: RefCell::new(ServerState::default()),
            }),
        }
    }

    /// Ask for the server on behalf of `scope`. The returned event fires once the grant happens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EnvironmentDropped`] if the owning environment no longer exists.
    pub fn request(&self, scope: Scope) -> Result<ValueEvent<Server>> {
        let env = self.core.env.upgrade()?;
        let request = ValueEvent::new(&env);

        let blocked = self.is_blocked();
        if blocked {
            let mut state = self.core.state.borrow_mut();
            state.queue.push_back((request.clone(), scope));
            tracing::debug!(%scope, waiting = state.queue.len(), "server request queued");
        } else {
            self.grant(request.clone(), scope)?;
        }
        Ok(request)
    }

    /// Hand the server back. The returned event fires once the server has moved on to the next contender.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidServerRelease`] unless the server is held, i.e. its current request has fired and no
    /// release is already underway.
    pub fn release(&self) -> Result<ValueEvent<Server>> {
        let env = self.core.env.upgrade()?;
        {
            let mut state = self.core.state.borrow_mut();
            match state.grant.as_mut() {
                Some(grant) if grant.phase == Phase::Held => grant.phase = Phase::Releasing,
                _ => return Err(Error::InvalidServerRelease),
            }
        }

        let release = ValueEvent::new(&env);
        let server = self.clone();
        release.event().prepend_callback(move |_| server.finish_release());
        release.succeed(self.clone())?;
        Ok(release)
    }

    /// Start `body` as a new process, but only if `scope` currently holds the server. Returns the event that fires once
    /// the body has returned, so the holder can await the action.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidServerAction`] if `scope` does not hold the server. A scope whose request has not fired
    /// yet, or whose release is underway, does not hold it either.
    pub fn server_action<F, Fut>(&self, scope: Scope, body: F) -> Result<Event>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result> + 'static,
    {
        {
            let state = self.core.state.borrow();
            match &state.grant {
                Some(grant) if grant.phase == Phase::Held && grant.scope == scope => {},
                other => {
                    return Err(Error::InvalidServerAction {
                        caller: scope,
                        holder: other.as_ref().map(|grant| grant.scope),
                    })
                },
            }
        }

        self.core.env.upgrade()?.process(body)
    }

    /// Whether a grant exists, whatever its phase.
    pub fn is_blocked(&self) -> bool {
        self.core.state.borrow().grant.is_some()
    }

    /// Scope the server is currently granted to.
    pub fn holder(&self) -> Option<Scope> {
        self.core.state.borrow().grant.as_ref().map(|grant| grant.scope)
    }

    /// Number of requests waiting for the server.
    pub fn queue_len(&self) -> usize {
        self.core.state.borrow().queue.len()
    }

    fn grant(&self, request: ValueEvent<Server>, scope: Scope) -> Result {
        let server = self.clone();
        request.event().prepend_callback(move |_| server.mark_held());
        self.core.state.borrow_mut().grant = Some(Grant {
            request: request.downgrade_value(),
            scope,
            phase: Phase::Pending,
        });
        tracing::debug!(%scope, "server granted");
        request.succeed(self.clone())
    }

    fn mark_held(&self) {
        if let Some(grant) = self.core.state.borrow_mut().grant.as_mut() {
            if grant.phase == Phase::Pending {
                grant.phase = Phase::Held;
            }
        }
    }

    fn finish_release(&self) {
        let next = {
            let mut state = self.core.state.borrow_mut();
            if let Some(grant) = state.grant.take() {
                tracing::debug!(scope = %grant.scope, "server released");
                grant.request.expire();
            }
            state.queue.pop_front()
        };

        if let Some((request, scope)) = next {
            if let Err(error) = self.grant(request, scope) {
                tracing::warn!(%scope, %error, "could not grant the server to the next request");
            }
        }
    }
}

impl Debug for Server {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let state = self.core.state.borrow();
        f.debug_struct("Server")
            .field("holder", &state.grant.as_ref().map(|grant| (grant.scope, grant.phase)))
            .field("queue_len", &state.queue.len())
            .finish()
    }
}
