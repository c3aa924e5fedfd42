use crate::{EventId, Scope};

use std::sync::Arc;

/// Shared, type-erased reason carried by a failed event.
pub type FailureReason = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that may be encountered while building or executing a simulation.
///
/// Configuration errors ([`InvalidConfiguration`]) are raised synchronously by the call that introduced the bad value,
/// so nothing invalid ever reaches the event queue.
///
/// The [`EmptySchedule`] variant originates from [`Environment::run()`] and [`Environment::run_until()`] when the
/// queue drains before the termination condition fires. This error likely corresponds to a logical bug on the client
/// side, e.g. waiting for an event that nothing ever schedules.
///
/// Resource misuse ([`InvalidServerAction`], [`InvalidServerRelease`], [`StoreAlreadyInitialized`],
/// [`CapacityExceeded`]) is reported at the point of misuse and leaves the scheduler untouched.
///
/// The [`BadExecution`] variant provides a wrapper for client-generated errors that can pass through
/// [`Environment::run()`] in a type-safe manner. Invoking [`std::error::Error::source()`] on this variant will acquire
/// a shared reference to the wrapped error for handling on the client side.
///
/// [`InvalidConfiguration`]: Error::InvalidConfiguration
/// [`EmptySchedule`]: Error::EmptySchedule
/// [`InvalidServerAction`]: Error::InvalidServerAction
/// [`InvalidServerRelease`]: Error::InvalidServerRelease
/// [`StoreAlreadyInitialized`]: Error::StoreAlreadyInitialized
/// [`CapacityExceeded`]: Error::CapacityExceeded
/// [`BadExecution`]: Error::BadExecution
/// [`Environment::run()`]: crate::Environment::run
/// [`Environment::run_until()`]: crate::Environment::run_until
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A delay, start time or run duration was negative, not finite, or otherwise unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The event was already placed on the queue once. Events fire exactly once.
    #[error("event {0} has already been scheduled")]
    AlreadyScheduled(EventId),

    /// The queue emptied out before the termination condition fired.
    #[error("event queue is empty but the termination condition never fired")]
    EmptySchedule,

    /// A run was requested from inside a run of the same environment.
    #[error("environment is already running")]
    AlreadyRunning,

    /// The environment that owns an event or resource no longer exists.
    #[error("the owning environment has been dropped")]
    EnvironmentDropped,

    /// An awaited event was failed instead of succeeded.
    #[error("event {id} failed: {source}")]
    EventFailed {
        /// Identifier of the failed event.
        id: EventId,
        /// Reason supplied to [`Event::fail()`](crate::Event::fail).
        source: FailureReason,
    },

    /// An awaited value event fired, but its value was expired before it could be read.
    #[error("event value is no longer available")]
    ValueUnavailable,

    /// An event was awaited outside of any process body.
    #[error("events can only be awaited from inside a process")]
    NotInProcess,

    /// A guarded server action was invoked by a scope that does not hold the server.
    #[error("{caller} attempted a server action but the server is held by {}", holder_name(.holder))]
    InvalidServerAction {
        /// Scope that attempted the action.
        caller: Scope,
        /// Scope holding the server at that moment, if any.
        holder: Option<Scope>,
    },

    /// The server was released while no acquired grant existed.
    #[error("server released without an acquired grant")]
    InvalidServerRelease,

    /// A store was initialized a second time.
    #[error("the store is already initialized")]
    StoreAlreadyInitialized,

    /// A store was initialized with more items than it can hold.
    #[error("{items} items exceed the store capacity of {capacity}")]
    CapacityExceeded {
        /// Number of items the store would hold.
        items: usize,
        /// Fixed capacity of the store.
        capacity: usize,
    },

    /// A client-generated error was encountered while executing a process. Call [`source()`] or unpack this value to
    /// handle it directly.
    ///
    /// [`source()`]: std::error::Error::source
    #[error("error while executing process: {0}")]
    BadExecution(#[source] FailureReason),
}

impl Error {
    /// Wrap a client-generated error so that it can be returned from a process body.
    pub fn bad_execution<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::BadExecution(Arc::new(error))
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }
}

/// [`std::result::Result`]`<T, `[`desproc::Error`]`>`
///
/// A type alias that simplifies the signatures of various functions in desproc. The success type defaults to `()`.
///
/// [`desproc::Error`]: Error
pub type Result<T = ()> = std::result::Result<T, Error>;

fn holder_name(holder: &Option<Scope>) -> String {
    holder.map_or_else(|| "nobody".to_owned(), |scope| scope.to_string())
}

/// Reject anything that could move the clock backward or poison the queue ordering.
pub(crate) fn check_delay(delay: f64, what: &str) -> Result {
    if delay.is_finite() && delay >= 0.0 {
        Ok(())
    } else {
        Err(Error::invalid(format!("{what} must be finite and non-negative, got {delay}")))
    }
}
