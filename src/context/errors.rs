use std::{error::Error, fmt};

use crate::{barrier::ExecutionError, cluster::TopologyError, communication::CommunicationError};

/// Error raised by the slots of a [`ClusterContext`](crate::context::ClusterContext).
///
/// None of these errors is retried; they indicate a bootstrap ordering bug
/// or an unusable environment and should abort the process.
#[derive(Debug)]
pub enum ContextError {
    /// A set-once slot was set a second time.
    DoubleInitialization { slot: &'static str, detail: String },
    /// A slot was set before the slot it depends on.
    MissingPrecondition {
        slot: &'static str,
        missing: &'static str,
    },
    /// An operation needs a slot that was never set.
    NotConstructed(&'static str),
    /// A host or graph could not be found.
    LookupFailure(String),
    Topology(TopologyError),
    Communication(CommunicationError),
    Execution(ExecutionError),
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ContextError::DoubleInitialization { slot, detail } if detail.is_empty() => {
                write!(f, "{} is already set", slot)
            }
            ContextError::DoubleInitialization { slot, detail } => {
                write!(f, "{} is already set:\n{}", slot, detail)
            }
            ContextError::MissingPrecondition { slot, missing } => {
                write!(f, "cannot set {} before {} is set", slot, missing)
            }
            ContextError::NotConstructed(slot) => write!(f, "{} was never set", slot),
            ContextError::LookupFailure(what) => write!(f, "{}", what),
            ContextError::Topology(e) => write!(f, "invalid cluster topology: {}", e),
            ContextError::Communication(e) => write!(f, "communication error: {}", e),
            ContextError::Execution(e) => write!(f, "execution error: {}", e),
        }
    }
}

impl Error for ContextError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ContextError::Topology(e) => Some(e),
            ContextError::Communication(e) => Some(e),
            ContextError::Execution(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TopologyError> for ContextError {
    fn from(e: TopologyError) -> Self {
        ContextError::Topology(e)
    }
}

impl From<CommunicationError> for ContextError {
    fn from(e: CommunicationError) -> Self {
        ContextError::Communication(e)
    }
}

impl From<std::io::Error> for ContextError {
    fn from(e: std::io::Error) -> Self {
        ContextError::Communication(e.into())
    }
}

impl From<ExecutionError> for ContextError {
    fn from(e: ExecutionError) -> Self {
        ContextError::Execution(e)
    }
}
