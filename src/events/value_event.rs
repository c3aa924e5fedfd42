use super::event::{Event, EventFuture};
use crate::environment::Environment;
use crate::{Error, Result};

use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

/// Availability of the value carried by a [`ValueEvent`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ValueStatus {
    /// Nothing has been assigned yet.
    #[default]
    Pending,
    /// The event succeeded with a value.
    Available,
    /// A competing outcome made the value moot, e.g. a released server grant.
    Expired,
}

struct ValueSlot<T> {
    status: ValueStatus,
    value: Option<T>,
}

impl<T> ValueSlot<T> {
    fn expire(&mut self) {
        self.value = None;
        self.status = ValueStatus::Expired;
    }
}

/// Non-owning handle on the value of a [`ValueEvent`]. Lets a resource expire a value it handed out without keeping
/// the value alive, which matters when the value refers back to the resource.
pub(crate) struct WeakValue<T>(Weak<RefCell<ValueSlot<T>>>);

impl<T> WeakValue<T> {
    /// Expire the value if any handle on the event still exists.
    pub(crate) fn expire(&self) {
        if let Some(slot) = self.0.upgrade() {
            slot.borrow_mut().expire();
        }
    }
}

/// An [`Event`] that additionally carries a typed result.
///
/// The value and its [`ValueStatus`] are assigned together by [`succeed()`], which then schedules the underlying event.
/// [`value()`] only returns something while the status is [`Available`].
///
/// Awaiting a [`ValueEvent`] inside a process resolves to the value itself.
///
/// [`succeed()`]: ValueEvent::succeed
/// [`value()`]: ValueEvent::value
/// [`Available`]: ValueStatus::Available
pub struct ValueEvent<T> {
    event: Event,
    slot: Rc<RefCell<ValueSlot<T>>>,
}

impl<T> ValueEvent<T> {
    /// Create an unscheduled value event with no delay.
    pub fn new(env: &Environment) -> Self {
        Self::from_event(Event::new(env))
    }

    /// Create an unscheduled value event that fires `delay` time units after it succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `delay` is negative or not finite.
    pub fn with_delay(env: &Environment, delay: f64) -> Result<Self> {
        Ok(Self::from_event(Event::with_delay(env, delay)?))
    }

    fn from_event(event: Event) -> Self {
        Self {
            event,
            slot: Rc::new(RefCell::new(ValueSlot {
                status: ValueStatus::Pending,
                value: None,
            })),
        }
    }

    /// Assign the value and schedule the event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyScheduled`] without touching the value if the event was already scheduled, or
    /// [`Error::EnvironmentDropped`] if the owning environment no longer exists.
    pub fn succeed(&self, value: T) -> Result {
        let env = self.event.environment()?;
        if let Some(id) = self.event.id() {
            return Err(Error::AlreadyScheduled(id));
        }

        {
            let mut slot = self.slot.borrow_mut();
            slot.value = Some(value);
            slot.status = ValueStatus::Available;
        }
        env.schedule(&self.event).map(drop)
    }

    /// Schedule the event as failed. See [`Event::fail()`].
    ///
    /// # Errors
    ///
    /// Same as [`Event::fail()`].
    pub fn fail<E>(&self, reason: E) -> Result
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        self.event.fail(reason)
    }

    /// Drop the value and mark it [`Expired`](ValueStatus::Expired).
    pub fn expire(&self) {
        self.slot.borrow_mut().expire();
    }

    pub(crate) fn downgrade_value(&self) -> WeakValue<T> {
        WeakValue(Rc::downgrade(&self.slot))
    }

    pub fn value_status(&self) -> ValueStatus {
        self.slot.borrow().status
    }

    /// The underlying event, for scheduling, callbacks and status flags.
    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn append_callback<F>(&self, callback: F)
    where
        F: FnOnce(&Event) + 'static,
    {
        self.event.append_callback(callback);
    }

    pub fn is_triggered(&self) -> bool {
        self.event.is_triggered()
    }

    pub fn is_processed(&self) -> bool {
        self.event.is_processed()
    }
}

impl<T: Clone> ValueEvent<T> {
    /// A copy of the value while it is [`Available`](ValueStatus::Available), `None` otherwise.
    pub fn value(&self) -> Option<T> {
        let slot = self.slot.borrow();
        match slot.status {
            ValueStatus::Available => slot.value.clone(),
            ValueStatus::Pending | ValueStatus::Expired => None,
        }
    }
}

impl<T> Clone for ValueEvent<T> {
    fn clone(&self) -> Self {
        Self {
            event: self.event.clone(),
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<T> AsRef<Event> for ValueEvent<T> {
    fn as_ref(&self) -> &Event {
        &self.event
    }
}

impl<T> Debug for ValueEvent<T> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.debug_struct("ValueEvent")
            .field("event", &self.event)
            .field("status", &self.slot.borrow().status)
            .finish()
    }
}

/// Future returned by awaiting a [`ValueEvent`]; resolves to the carried value.
#[must_use = "futures do nothing unless awaited"]
pub struct ValueFuture<T> {
    inner: EventFuture,
    event: ValueEvent<T>,
}

impl<T: Clone> Future for ValueFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(error)) => Poll::Ready(Err(error)),
            Poll::Ready(Ok(())) => Poll::Ready(self.event.value().ok_or(Error::ValueUnavailable)),
        }
    }
}

impl<T: Clone> IntoFuture for ValueEvent<T> {
    type Output = Result<T>;
    type IntoFuture = ValueFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        ValueFuture {
            inner: self.event.clone().into_future(),
            event: self,
        }
    }
}

impl<T: Clone> IntoFuture for &ValueEvent<T> {
    type Output = Result<T>;
    type IntoFuture = ValueFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.clone().into_future()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_is_hidden_until_success() {
        let env = Environment::new();
        let event = ValueEvent::new(&env);
        assert_eq!(None, event.value(), "value should not be readable before success");
        assert_eq!(ValueStatus::Pending, event.value_status(), "unexpected status");

        event.succeed("Success!!").unwrap();
        assert_eq!(Some("Success!!"), event.value(), "value should be readable after success");
        assert_eq!(ValueStatus::Available, event.value_status(), "unexpected status");
    }

    #[test]
    fn expired_value_is_cleared() {
        let env = Environment::new();
        let event = ValueEvent::new(&env);
        event.succeed(7).unwrap();
        event.expire();

        assert_eq!(None, event.value(), "expired value should not be readable");
        assert_eq!(ValueStatus::Expired, event.value_status(), "unexpected status");
    }

    #[test]
    fn second_succeed_keeps_first_value() {
        let env = Environment::new();
        let event = ValueEvent::new(&env);
        event.succeed(1).unwrap();

        assert!(
            matches!(event.succeed(2), Err(Error::AlreadyScheduled(_))),
            "second succeed should be rejected"
        );
        assert_eq!(Some(1), event.value(), "value should not be overwritten");
    }
}
