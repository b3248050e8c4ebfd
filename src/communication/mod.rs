//! Data structures for communication between sessions and the coordinator
//! hosted by each [`Server`](crate::node::Server).

// Private submodules
mod codec;
mod connect;
mod errors;

// Crate-wide visible submodules
pub(crate) mod notifications;

// Crate-wide exports
pub(crate) use codec::ControlPlaneCodec;
pub(crate) use connect::connect_to_host;
pub(crate) use notifications::{CoordinatorNotification, DriverNotification, SessionNotification};

// Public exports
pub use errors::{CodecError, CommunicationError};
pub use notifications::RequestId;
