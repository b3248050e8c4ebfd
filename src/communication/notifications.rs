use serde::{Deserialize, Serialize};

use crate::cluster::Host;

/// Identifies a request of one session; responses carry the same ID.
pub type RequestId = u64;

/// Notifications from the owner of a [`Server`](crate::node::Server) to its coordinator.
#[derive(Debug, Clone)]
pub(crate) enum DriverNotification {
    Shutdown,
}

/// A [`SessionNotification`] specifies the notifications that a
/// [`Session`](crate::node::Session) can send to the coordinator of a
/// [`Server`](crate::node::Server).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum SessionNotification {
    /// The first message on every connection, naming the connecting host.
    Initialized(Host),
    /// Deposit one token into each of `queues` at once, waiting while any of them is full.
    Enqueue {
        request: RequestId,
        queues: Vec<String>,
        capacity: usize,
        deadline_ms: Option<u64>,
    },
    /// Take `count` tokens out of `queue`, waiting until that many are available.
    DequeueMany {
        request: RequestId,
        queue: String,
        capacity: usize,
        count: usize,
        deadline_ms: Option<u64>,
    },
    /// Withdraw a waiting request; it neither deposits nor consumes tokens.
    Cancel { request: RequestId },
    /// Ask the server hosting the coordinator to shut down.
    ShutdownServer,
    /// The session is closing its connection.
    Shutdown,
}

/// A [`CoordinatorNotification`] specifies the notifications that the
/// coordinator of a [`Server`](crate::node::Server) can send to a
/// [`Session`](crate::node::Session).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum CoordinatorNotification {
    Completed(RequestId),
    Rejected(RequestId, String),
    TimedOut(RequestId),
    Shutdown,
}
