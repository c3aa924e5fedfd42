//! Shared resources that processes contend for.
//!
//! Both resources hand out [`ValueEvent`](crate::ValueEvent)s: a process awaits the event to wait for its turn, and
//! the event's value is whatever the resource granted. Contenders are always served in the order they asked.

mod server;
mod store;

pub use server::Server;
pub use store::Store;
