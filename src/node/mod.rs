//! The endpoint every host of a cluster runs, and the sessions hosts use to
//! reach each other.
//!
//! A [`Server`] binds the address the topology lists for its host and serves
//! a coordinator there. The coordinator keeps the named token queues that
//! [barriers](crate::barrier) rendezvous on. A [`Session`] is the client side
//! of that protocol and the [`ExecutionContext`](crate::barrier::ExecutionContext)
//! barriers run in across processes.

// Private submodules
mod coordinator;
mod queues;
mod server;
mod session;

// Crate-wide exports
pub(crate) use queues::QueueTable;

// Public exports
pub use queues::QueueError;
pub use server::{Server, ServerConfig};
pub use session::Session;
