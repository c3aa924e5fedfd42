mod condition;
mod event;
mod event_holder;
mod value_event;

pub use condition::{AllOf, AnyOf, Watched};
pub use event::{Event, EventFuture, EventId, Priority};
pub use value_event::{ValueEvent, ValueFuture, ValueStatus};
pub(crate) use value_event::WeakValue;

use crate::Result;
use event_holder::EventHolder;

use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Priority queue of scheduled events.
///
/// Events will execute in ascending order of execution time. Among events due at the same time, [`Priority::High`]
/// events execute first, and any remaining tie is broken by the order in which events were pushed onto the queue.
/// That last tiebreaker is what makes two runs of the same model produce the same trace.
///
/// The queue also owns the identifier counter, so identifiers are unique per environment and start at zero.
///
/// Popping events from the queue only occurs inside the [`Environment`](crate::Environment) run loop.
#[derive(Debug, Default)]
pub(crate) struct EventQueue {
    events: BinaryHeap<Reverse<EventHolder>>,
    events_added: u64,
}

impl EventQueue {
    /// Place the event on the queue, due `event.delay()` after `now`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyScheduled`](crate::Error::AlreadyScheduled) with no modifications to the queue if the
    /// event was placed on a queue before.
    pub(crate) fn schedule(&mut self, event: &Event, now: f64) -> Result<EventId> {
        let execution_time = now + event.delay();
        let id = EventId::from_raw(self.events_added);
        event.mark_scheduled(id, execution_time)?;
        self.events_added += 1;

        self.events.push(Reverse(EventHolder {
            execution_time: OrderedFloat(execution_time),
            priority: event.priority(),
            id,
            event: event.clone(),
        }));
        Ok(id)
    }

    /// Pop the next event along with the time it is due.
    pub(crate) fn next(&mut self) -> Option<(f64, Event)> {
        self.events
            .pop()
            .map(|Reverse(holder)| (holder.execution_time.into_inner(), holder.event))
    }

    pub(crate) fn peek_time(&self) -> Option<f64> {
        self.events
            .peek()
            .map(|Reverse(holder)| holder.execution_time.into_inner())
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }
}
