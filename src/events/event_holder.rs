use super::event::{Event, EventId, Priority};

use ordered_float::OrderedFloat;
use std::cmp::Ordering;

/// Helper struct for the event queue. This struct holds a handle to the event itself alongside the data necessary to
/// sort events within the priority queue, namely the execution time, the priority and the identifier assigned when the
/// event was scheduled.
///
/// The implementation of [`Ord`] on this struct cares first about the execution time, then about the priority (higher
/// first), and compares the identifiers only to break the remaining ties, which keeps the run order reproducible.
#[derive(Debug)]
pub(super) struct EventHolder {
    pub execution_time: OrderedFloat<f64>,
    pub priority: Priority,
    pub id: EventId,
    pub event: Event,
}

impl PartialEq<Self> for EventHolder {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EventHolder {}

impl PartialOrd<Self> for EventHolder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventHolder {
    fn cmp(&self, other: &Self) -> Ordering {
        self.execution_time
            .cmp(&other.execution_time)
            .then_with(|| other.priority.cmp(&self.priority))
            .then_with(|| self.id.cmp(&other.id))
    }
}
