//! Direct channel messages.
//!
//! Sent as bincode frames by [`crate::transport::MessageTransport`]. Extension payloads are not
//! part of the frames; they live in the shared extension buffers.

use serde::{Deserialize, Serialize};

/// Handle of a shared buffer that the peer can map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferHandle {
    /// Backing name, relative to the shared-memory directory.
    pub name: String,
    pub size: usize,
}

/// A direct (non-tunneled) extension call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionMessage {
    pub instance_id: i32,
    pub uri: String,
    pub opcode: i32,
    pub request_id: u32,
    /// Request payload size in the extension buffer.
    pub data_size: usize,
}

/// Messages from the client (host) to the service (plugin side).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    Instantiate {
        plugin_id: String,
        sample_rate: u32,
    },
    AddExtension {
        instance_id: i32,
        uri: String,
        buffer: BufferHandle,
    },
    CompleteInstantiation {
        instance_id: i32,
    },
    Prepare {
        instance_id: i32,
        frame_count: usize,
        buffers: Vec<BufferHandle>,
    },
    Activate {
        instance_id: i32,
    },
    Process {
        instance_id: i32,
        frame_count: usize,
        timeout_ns: u64,
    },
    Deactivate {
        instance_id: i32,
    },
    Extension(ExtensionMessage),
    Dispose {
        instance_id: i32,
    },
}

/// Messages from the service back to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServiceMessage {
    Instantiated { instance_id: i32 },
    Ok,
    /// Reply payload size now in the extension buffer.
    ExtensionReply { request_id: u32, data_size: usize },
    Error(String),
}
