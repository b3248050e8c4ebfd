use std::{error::Error, fmt, io};

use tokio::sync::{mpsc, oneshot};

/// Error raised by the communication layer.
#[derive(Debug)]
pub enum CommunicationError {
    /// The channel or the TCP stream has been closed.
    Disconnected,
    /// None of the addresses a host name resolves to accepted a connection.
    UnresolvedAddress(String),
    /// Failed to serialize/deserialize data with Bincode.
    BincodeError(bincode::Error),
    /// Failed to read/write data from/to the TCP stream.
    IoError(io::Error),
    /// The peer sent or was about to receive a frame above the size limit.
    FrameTooLarge { size: usize, limit: usize },
}

impl fmt::Display for CommunicationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CommunicationError::Disconnected => write!(f, "the connection was closed"),
            CommunicationError::UnresolvedAddress(address) => {
                write!(f, "unable to resolve address {}", address)
            }
            CommunicationError::BincodeError(e) => write!(f, "bincode error: {}", e),
            CommunicationError::IoError(e) => write!(f, "I/O error: {}", e),
            CommunicationError::FrameTooLarge { size, limit } => {
                write!(f, "frame of {} bytes exceeds the limit of {} bytes", size, limit)
            }
        }
    }
}

impl Error for CommunicationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CommunicationError::BincodeError(e) => Some(e),
            CommunicationError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<bincode::Error> for CommunicationError {
    fn from(e: bincode::Error) -> Self {
        CommunicationError::BincodeError(e)
    }
}

impl From<io::Error> for CommunicationError {
    fn from(e: io::Error) -> Self {
        CommunicationError::IoError(e)
    }
}

impl<T> From<mpsc::error::SendError<T>> for CommunicationError {
    fn from(_e: mpsc::error::SendError<T>) -> Self {
        CommunicationError::Disconnected
    }
}

impl From<oneshot::error::RecvError> for CommunicationError {
    fn from(_e: oneshot::error::RecvError) -> Self {
        CommunicationError::Disconnected
    }
}

impl From<CodecError> for CommunicationError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::IoError(e) => CommunicationError::IoError(e),
            CodecError::BincodeError(e) => CommunicationError::BincodeError(e),
            CodecError::FrameTooLarge { size, limit } => {
                CommunicationError::FrameTooLarge { size, limit }
            }
        }
    }
}

/// Error that is raised by the `ControlPlaneCodec` when messages cannot be encoded or decoded.
#[derive(Debug)]
pub enum CodecError {
    IoError(io::Error),
    /// Bincode serialization/deserialization error.
    BincodeError(bincode::Error),
    /// A frame exceeds the largest message size accepted on a connection.
    FrameTooLarge { size: usize, limit: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CodecError::IoError(e) => write!(f, "I/O error: {}", e),
            CodecError::BincodeError(e) => write!(f, "bincode error: {}", e),
            CodecError::FrameTooLarge { size, limit } => {
                write!(f, "frame of {} bytes exceeds the limit of {} bytes", size, limit)
            }
        }
    }
}

impl Error for CodecError {}

impl From<io::Error> for CodecError {
    fn from(e: io::Error) -> CodecError {
        CodecError::IoError(e)
    }
}

impl From<bincode::Error> for CodecError {
    fn from(e: bincode::Error) -> Self {
        CodecError::BincodeError(e)
    }
}
