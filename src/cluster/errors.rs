use std::{error::Error, fmt};

/// Error raised when a cluster topology cannot be parsed.
#[derive(Debug)]
pub enum TopologyError {
    /// The serialized topology is not valid JSON of the expected shape.
    JsonError(serde_json::Error),
    /// An address is not of the form `ip:port`.
    InvalidAddress(String),
    /// A key of an indexed role mapping is not a non-negative integer.
    InvalidTaskIndex { role: String, key: String },
    /// Two keys of an indexed role mapping resolve to the same task index.
    DuplicateTask { role: String, task_index: usize },
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TopologyError::JsonError(e) => write!(f, "malformed cluster topology: {}", e),
            TopologyError::InvalidAddress(address) => {
                write!(f, "expected an address of the form ip:port, got {:?}", address)
            }
            TopologyError::InvalidTaskIndex { role, key } => {
                write!(f, "role {} has a non-integer task index {:?}", role, key)
            }
            TopologyError::DuplicateTask { role, task_index } => {
                write!(f, "role {} lists task {} more than once", role, task_index)
            }
        }
    }
}

impl Error for TopologyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TopologyError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for TopologyError {
    fn from(e: serde_json::Error) -> Self {
        TopologyError::JsonError(e)
    }
}
