//! # Overview
//!
//! desproc is a process-oriented framework for discrete-event simulations. Where an event-oriented simulation asks you
//! to split every activity into separate callbacks, desproc lets you write each entity's behavior as one straight
//! `async` body that waits on simulated time:
//!
//! * An [`Environment`] owns the virtual clock and a priority queue of [`Event`]s. Its run loop pops the earliest event,
//!   advances the clock to it, and runs the event's callbacks.
//! * A [`Process`] wraps an `async` body. Every `.await` on an [`Event`], a [`ValueEvent`], an [`AllOf`] or an
//!   [`AnyOf`] suspends the body until that event fires. Processes can await other processes, which is how larger
//!   behaviors are composed out of smaller ones.
//! * A [`Server`] grants exclusive ownership to one process at a time, and a [`Store`] is a bounded FIFO buffer of
//!   items. Both serve their contenders strictly in arrival order.
//!
//! Everything runs on a single thread, and the order in which events fire is fully determined: events due at the same
//! time fire by [`Priority`] first and scheduling order second. Two runs of the same model with the same seeds produce
//! the same trace, which matters as soon as a simulation is used for statistical experiments.
//!
//! ```
//! use desproc::{Environment, Server};
//!
//! let env = Environment::new();
//! let server = Server::new(&env);
//! for _ in 0..2 {
//!     let clock = env.clone();
//!     let server = server.clone();
//!     env.process(move |scope| async move {
//!         server.request(scope)?.await?;
//!         clock.timeout(5.0)?.await?;
//!         server.release()?.await?;
//!         Ok(())
//!     })?;
//! }
//! env.run(20.0)?;
//! assert!(!server.is_blocked());
//! # Ok::<(), desproc::Error>(())
//! ```
//!
//! # Failures
//!
//! Every fallible operation returns [`Result`]. Configuration mistakes such as negative delays are rejected by the
//! call that introduced them. Inside a process body, `?` propagates errors out of the body; a body that returns an
//! error halts the run, and [`Environment::run()`] returns that same error. Client-defined errors can travel the same
//! way through [`Error::bad_execution()`].
//!
//! desproc emits diagnostics through [`tracing`](https://docs.rs/tracing) and never installs a subscriber itself.

mod environment;
mod error;
mod events;
mod process;
mod resources;

pub use environment::Environment;
pub use error::{Error, FailureReason, Result};
pub use events::{AllOf, AnyOf, Event, EventFuture, EventId, Priority, ValueEvent, ValueFuture, ValueStatus, Watched};
pub use process::{Process, Scope};
pub use resources::{Server, Store};
