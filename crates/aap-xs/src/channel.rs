//! The direct (non-realtime) channel between a client and a plugin service.
//!
//! Used for the instance lifecycle and for every extension call made while the instance is
//! not active. Connection establishment belongs to the embedder; it hands the client an
//! implementation of [`DirectChannel`].

use crate::error::Result;
use crate::protocol::{BufferHandle, ClientMessage, ExtensionMessage, ServiceMessage};

/// Blocking calls into a plugin service.
pub trait DirectChannel: Send + Sync {
    /// Creates a plugin instance and returns its id.
    fn instantiate(&self, plugin_id: &str, sample_rate: u32) -> Result<i32>;

    /// Publishes the client's serialization buffer for one extension.
    fn add_extension(&self, instance_id: i32, uri: &str, buffer: &BufferHandle) -> Result<()>;

    fn complete_instantiation(&self, instance_id: i32) -> Result<()>;

    /// Publishes the port buffers, in port order.
    fn prepare(&self, instance_id: i32, frame_count: usize, buffers: &[BufferHandle])
        -> Result<()>;

    fn activate(&self, instance_id: i32) -> Result<()>;

    fn process(&self, instance_id: i32, frame_count: usize, timeout_ns: u64) -> Result<()>;

    fn deactivate(&self, instance_id: i32) -> Result<()>;

    /// Runs one extension call. The request payload is already in the shared extension
    /// buffer; returns the size of the reply payload now there.
    fn extension(&self, message: &ExtensionMessage) -> Result<usize>;

    fn dispose(&self, instance_id: i32) -> Result<()>;
}

fn ok_or_error(result: Result<()>) -> ServiceMessage {
    match result {
        Ok(()) => ServiceMessage::Ok,
        Err(e) => ServiceMessage::Error(e.to_string()),
    }
}

/// Answers one client message from `channel`.
pub fn dispatch_message(channel: &dyn DirectChannel, message: ClientMessage) -> ServiceMessage {
    match message {
        ClientMessage::Instantiate {
            plugin_id,
            sample_rate,
        } => match channel.instantiate(&plugin_id, sample_rate) {
            Ok(instance_id) => ServiceMessage::Instantiated { instance_id },
            Err(e) => ServiceMessage::Error(e.to_string()),
        },
        ClientMessage::AddExtension {
            instance_id,
            uri,
            buffer,
        } => ok_or_error(channel.add_extension(instance_id, &uri, &buffer)),
        ClientMessage::CompleteInstantiation { instance_id } => {
            ok_or_error(channel.complete_instantiation(instance_id))
        }
        ClientMessage::Prepare {
            instance_id,
            frame_count,
            buffers,
        } => ok_or_error(channel.prepare(instance_id, frame_count, &buffers)),
        ClientMessage::Activate { instance_id } => ok_or_error(channel.activate(instance_id)),
        ClientMessage::Process {
            instance_id,
            frame_count,
            timeout_ns,
        } => ok_or_error(channel.process(instance_id, frame_count, timeout_ns)),
        ClientMessage::Deactivate { instance_id } => ok_or_error(channel.deactivate(instance_id)),
        ClientMessage::Extension(message) => match channel.extension(&message) {
            Ok(data_size) => ServiceMessage::ExtensionReply {
                request_id: message.request_id,
                data_size,
            },
            Err(e) => ServiceMessage::Error(e.to_string()),
        },
        ClientMessage::Dispose { instance_id } => ok_or_error(channel.dispose(instance_id)),
    }
}
