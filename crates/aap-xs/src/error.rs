//! Error types for the AAPXS runtime

use crate::shared_memory::AllocationResult;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum XsError {
    #[error("Extension registry is frozen, cannot add {0}")]
    RegistryFrozen(String),

    #[error("URID table is full, cannot map {0}")]
    UridTableFull(String),

    #[error("Unknown extension: {0}")]
    UnknownExtension(String),

    #[error("Shared memory allocation failed: {0}")]
    Allocation(AllocationResult),

    #[error("Shared memory error: {0}")]
    SharedMemory(String),

    #[error("AAPXS message for {uri} (opcode {opcode}) does not fit the tunnel buffer")]
    EncodeOverflow { uri: String, opcode: i32 },

    #[error("Too many pending AAPXS callbacks (max {0})")]
    PendingCallbacksFull(usize),

    #[error("Pending UMP queue is full")]
    QueueFull,

    #[error("Request {request_id} to {uri} (opcode {opcode}) was abandoned")]
    CallAbandoned {
        uri: String,
        opcode: i32,
        request_id: u32,
    },

    #[error("{uri} is busy with another call, opcode {opcode} not sent")]
    Busy { uri: String, opcode: i32 },

    #[error("Reply from {uri} (opcode {opcode}) is malformed: {reason}")]
    MalformedReply {
        uri: String,
        opcode: i32,
        reason: String,
    },

    #[error("Unknown plugin instance: {0}")]
    UnknownInstance(i32),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, XsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = XsError::EncodeOverflow {
            uri: "urn://example/ext".into(),
            opcode: 3,
        };
        assert!(err.to_string().contains("opcode 3"));

        let err = XsError::Allocation(AllocationResult::FailedMap);
        assert!(err.to_string().contains("map"));

        let err = XsError::CallAbandoned {
            uri: "urn://example/ext".into(),
            opcode: 1,
            request_id: 42,
        };
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: XsError = io_err.into();
        match err {
            XsError::Io(_) => {}
            _ => panic!("Expected Io variant"),
        }
    }
}
