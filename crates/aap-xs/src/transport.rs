//! Framed direct channel over Unix sockets.
//!
//! Each frame is a big-endian u32 length followed by a bincode body. Extension payloads are
//! not framed; both sides map the same extension buffers.

use crate::channel::{dispatch_message, DirectChannel};
use crate::error::{Result, XsError};
use crate::protocol::{BufferHandle, ClientMessage, ExtensionMessage, ServiceMessage};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

/// Refuse frames larger than this; a corrupt length prefix would otherwise allocate wildly.
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Message transport for one connection.
pub struct MessageTransport {
    stream: UnixStream,
}

impl MessageTransport {
    pub fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        Ok(Self { stream })
    }

    /// Wraps a connected std socket. Must be called from within a tokio runtime.
    pub fn from_std(stream: std::os::unix::net::UnixStream) -> Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream: UnixStream::from_std(stream)?,
        })
    }

    async fn send_frame(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_u32(data.len() as u32).await?;
        self.stream.write_all(data).await?;
        Ok(())
    }

    async fn recv_frame(&mut self) -> Result<Vec<u8>> {
        let len = self.stream.read_u32().await? as usize;
        if len > MAX_FRAME_SIZE {
            return Err(XsError::ProtocolError(format!(
                "frame of {} bytes exceeds {}",
                len, MAX_FRAME_SIZE
            )));
        }
        let mut data = vec![0u8; len];
        self.stream.read_exact(&mut data).await?;
        Ok(data)
    }

    pub async fn send_client_message(&mut self, msg: &ClientMessage) -> Result<()> {
        let data = bincode::serialize(msg)?;
        self.send_frame(&data).await
    }

    pub async fn recv_client_message(&mut self) -> Result<ClientMessage> {
        let data = self.recv_frame().await?;
        Ok(bincode::deserialize(&data)?)
    }

    pub async fn send_service_message(&mut self, msg: &ServiceMessage) -> Result<()> {
        let data = bincode::serialize(msg)?;
        self.send_frame(&data).await
    }

    pub async fn recv_service_message(&mut self) -> Result<ServiceMessage> {
        let data = self.recv_frame().await?;
        Ok(bincode::deserialize(&data)?)
    }
}

/// Server-side transport listener
pub struct TransportListener {
    listener: UnixListener,
}

impl TransportListener {
    pub async fn bind(socket_path: &Path) -> Result<Self> {
        // Remove a stale socket from an earlier run.
        let _ = std::fs::remove_file(socket_path);
        let listener = UnixListener::bind(socket_path)?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> Result<MessageTransport> {
        let (stream, _) = self.listener.accept().await?;
        Ok(MessageTransport::new(stream))
    }
}

/// Answers client frames with `channel` until the peer hangs up.
///
/// `channel` is called inline, so a slow plugin call holds up this connection only.
pub async fn serve(mut transport: MessageTransport, channel: Arc<dyn DirectChannel>) -> Result<()> {
    loop {
        let message = match transport.recv_client_message().await {
            Ok(message) => message,
            Err(XsError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::debug!("Client disconnected");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        tracing::trace!(?message, "Direct channel request");
        let reply = dispatch_message(channel.as_ref(), message);
        transport.send_service_message(&reply).await?;
    }
}

/// [`DirectChannel`] over a [`MessageTransport`].
///
/// Owns a current-thread runtime and blocks on each round trip, so it must not be used from
/// inside another tokio runtime.
pub struct TransportChannel {
    runtime: tokio::runtime::Runtime,
    transport: Mutex<MessageTransport>,
}

impl TransportChannel {
    pub fn connect(socket_path: &Path) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()?;
        let transport = runtime.block_on(MessageTransport::connect(socket_path))?;
        Ok(Self {
            runtime,
            transport: Mutex::new(transport),
        })
    }

    pub fn from_std(stream: std::os::unix::net::UnixStream) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()?;
        let transport = {
            let _guard = runtime.enter();
            MessageTransport::from_std(stream)?
        };
        Ok(Self {
            runtime,
            transport: Mutex::new(transport),
        })
    }

    fn call(&self, message: &ClientMessage) -> Result<ServiceMessage> {
        let mut transport = self.transport.lock();
        let reply = self.runtime.block_on(async {
            transport.send_client_message(message).await?;
            transport.recv_service_message().await
        })?;
        match reply {
            ServiceMessage::Error(msg) => Err(XsError::Remote(msg)),
            reply => Ok(reply),
        }
    }

    fn call_ok(&self, message: ClientMessage) -> Result<()> {
        match self.call(&message)? {
            ServiceMessage::Ok => Ok(()),
            other => Err(XsError::ProtocolError(format!(
                "unexpected reply {:?}",
                other
            ))),
        }
    }
}

impl DirectChannel for TransportChannel {
    fn instantiate(&self, plugin_id: &str, sample_rate: u32) -> Result<i32> {
        match self.call(&ClientMessage::Instantiate {
            plugin_id: plugin_id.to_string(),
            sample_rate,
        })? {
            ServiceMessage::Instantiated { instance_id } => Ok(instance_id),
            other => Err(XsError::ProtocolError(format!(
                "unexpected reply {:?}",
                other
            ))),
        }
    }

    fn add_extension(&self, instance_id: i32, uri: &str, buffer: &BufferHandle) -> Result<()> {
        self.call_ok(ClientMessage::AddExtension {
            instance_id,
            uri: uri.to_string(),
            buffer: buffer.clone(),
        })
    }

    fn complete_instantiation(&self, instance_id: i32) -> Result<()> {
        self.call_ok(ClientMessage::CompleteInstantiation { instance_id })
    }

    fn prepare(&self, instance_id: i32, frame_count: usize, buffers: &[BufferHandle]) -> Result<()> {
        self.call_ok(ClientMessage::Prepare {
            instance_id,
            frame_count,
            buffers: buffers.to_vec(),
        })
    }

    fn activate(&self, instance_id: i32) -> Result<()> {
        self.call_ok(ClientMessage::Activate { instance_id })
    }

    fn process(&self, instance_id: i32, frame_count: usize, timeout_ns: u64) -> Result<()> {
        self.call_ok(ClientMessage::Process {
            instance_id,
            frame_count,
            timeout_ns,
        })
    }

    fn deactivate(&self, instance_id: i32) -> Result<()> {
        self.call_ok(ClientMessage::Deactivate { instance_id })
    }

    fn extension(&self, message: &ExtensionMessage) -> Result<usize> {
        match self.call(&ClientMessage::Extension(message.clone()))? {
            ServiceMessage::ExtensionReply {
                request_id,
                data_size,
            } if request_id == message.request_id => Ok(data_size),
            other => Err(XsError::ProtocolError(format!(
                "unexpected reply {:?} to request {}",
                other, message.request_id
            ))),
        }
    }

    fn dispose(&self, instance_id: i32) -> Result<()> {
        self.call_ok(ClientMessage::Dispose { instance_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_over_socket_pair() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut client = MessageTransport::new(a);
        let mut service = MessageTransport::new(b);

        client
            .send_client_message(&ClientMessage::Activate { instance_id: 2 })
            .await
            .unwrap();
        match service.recv_client_message().await.unwrap() {
            ClientMessage::Activate { instance_id } => assert_eq!(instance_id, 2),
            _ => panic!("Expected Activate"),
        }

        service
            .send_service_message(&ServiceMessage::Error("boom".into()))
            .await
            .unwrap();
        assert_eq!(
            client.recv_service_message().await.unwrap(),
            ServiceMessage::Error("boom".into())
        );
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let (mut a, b) = UnixStream::pair().unwrap();
        let mut service = MessageTransport::new(b);
        a.write_u32((MAX_FRAME_SIZE + 1) as u32).await.unwrap();
        match service.recv_client_message().await {
            Err(XsError::ProtocolError(_)) => {}
            _ => panic!("Expected ProtocolError"),
        }
    }

    #[tokio::test]
    async fn test_listener_accepts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aap.sock");
        let listener = TransportListener::bind(&path).await.unwrap();

        let connect = tokio::spawn({
            let path = path.clone();
            async move { MessageTransport::connect(&path).await }
        });
        let mut service = listener.accept().await.unwrap();
        let mut client = connect.await.unwrap().unwrap();

        client
            .send_client_message(&ClientMessage::Dispose { instance_id: 1 })
            .await
            .unwrap();
        assert_eq!(
            service.recv_client_message().await.unwrap(),
            ClientMessage::Dispose { instance_id: 1 }
        );
    }
}
