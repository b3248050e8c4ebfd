use std::{error::Error, fmt};

use crate::communication::CommunicationError;

/// Error reported by an [`Operation`](crate::barrier::Operation) a signal host waits for.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationError(pub String);

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for OperationError {}

impl From<String> for OperationError {
    fn from(reason: String) -> Self {
        OperationError(reason)
    }
}

impl From<&str> for OperationError {
    fn from(reason: &str) -> Self {
        OperationError(reason.to_string())
    }
}

/// Error raised when constructing or executing a [`Barrier`](crate::barrier::Barrier).
#[derive(Debug)]
pub enum ExecutionError {
    /// Task lists were supplied, but not exactly one per signal host.
    TaskListMismatch {
        signal_hosts: usize,
        task_lists: usize,
    },
    /// An operation a signal host waited for failed, so no token was emitted.
    TaskFailed(OperationError),
    /// The coordinator refused a request, e.g. because the queue already
    /// exists with another capacity.
    Rejected { queue: String, reason: String },
    /// The request did not complete in time. It was withdrawn without
    /// depositing or consuming tokens.
    Timeout { queue: String },
    CommunicationError(CommunicationError),
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecutionError::TaskListMismatch {
                signal_hosts,
                task_lists,
            } => write!(
                f,
                "got {} task lists for {} signal hosts",
                task_lists, signal_hosts
            ),
            ExecutionError::TaskFailed(e) => write!(f, "a gating task failed: {}", e),
            ExecutionError::Rejected { queue, reason } => {
                write!(f, "request on queue {} was rejected: {}", queue, reason)
            }
            ExecutionError::Timeout { queue } => {
                write!(f, "request on queue {} timed out", queue)
            }
            ExecutionError::CommunicationError(e) => write!(f, "communication error: {}", e),
        }
    }
}

impl Error for ExecutionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ExecutionError::TaskFailed(e) => Some(e),
            ExecutionError::CommunicationError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CommunicationError> for ExecutionError {
    fn from(e: CommunicationError) -> Self {
        ExecutionError::CommunicationError(e)
    }
}

impl From<OperationError> for ExecutionError {
    fn from(e: OperationError) -> Self {
        ExecutionError::TaskFailed(e)
    }
}
