//! Per-instance extension dispatcher.
//!
//! One [`InitiatorInstance`] and one [`RecipientInstance`] exist per registered extension, both
//! bound to that extension's [`SerializationContext`]. Which of the two serves plugin-side and
//! which serves host-side calls depends on the dispatcher's role:
//!
//! | role    | plugin extension | host extension |
//! |---------|------------------|----------------|
//! | Client  | initiator        | recipient      |
//! | Service | recipient        | initiator      |

use crate::error::{Result, XsError};
use crate::registry::{ExtensionDefinition, ExtensionRegistry};
use crate::serialization::SerializationContext;
use crate::shared_memory::{SharedBuffer, SharedMemoryRequester};
use aap_core::CallChannel;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Buffer size for extensions that declare no capacity.
const INLINE_BUFFER_SIZE: usize = 64;

/// Monotonic request ids for one instance. Never yields 0.
#[derive(Debug)]
pub struct RequestIdGenerator {
    next: AtomicU32,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    pub fn next_id(&self) -> u32 {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// One outgoing call. The payload is already in `serialization`.
#[derive(Debug, Clone, Copy)]
pub struct AapxsRequest<'a> {
    pub request_id: u32,
    pub urid: u8,
    pub uri: &'static str,
    pub opcode: i32,
    pub serialization: &'a SerializationContext,
}

/// Completion of a call. The reply payload is in the initiator's serialization buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyInfo {
    pub request_id: u32,
    pub opcode: i32,
    pub data_size: usize,
}

pub type ReplyCallback = Box<dyn FnOnce(ReplyInfo) + Send>;

/// Delivers requests to the peer, over the direct channel or the tunnel.
pub trait AapxsSender: Send + Sync {
    /// Sends `request`. `callback`, when given, fires once the reply payload is in the
    /// serialization buffer; for direct calls that happens before `send` returns.
    fn send(&self, request: &AapxsRequest<'_>, callback: Option<ReplyCallback>)
        -> Result<CallChannel>;
}

/// Calling side of one extension.
pub struct InitiatorInstance {
    definition: ExtensionDefinition,
    serialization: Arc<SerializationContext>,
    sender: Arc<dyn AapxsSender>,
    ids: Arc<RequestIdGenerator>,
    /// Serializes calls, since they share one serialization buffer.
    call_lock: Mutex<()>,
}

impl InitiatorInstance {
    pub fn new(
        definition: ExtensionDefinition,
        serialization: Arc<SerializationContext>,
        sender: Arc<dyn AapxsSender>,
        ids: Arc<RequestIdGenerator>,
    ) -> Self {
        Self {
            definition,
            serialization,
            sender,
            ids,
            call_lock: Mutex::new(()),
        }
    }

    pub fn definition(&self) -> &ExtensionDefinition {
        &self.definition
    }

    pub fn serialization(&self) -> &Arc<SerializationContext> {
        &self.serialization
    }

    fn request(&self, opcode: i32) -> AapxsRequest<'_> {
        AapxsRequest {
            request_id: self.ids.next_id(),
            urid: self.definition.urid,
            uri: self.definition.uri,
            opcode,
            serialization: &self.serialization,
        }
    }

    /// Sends a request and blocks until its reply arrives. Never call this from the audio
    /// thread: while the instance is active the reply only arrives in a later `process` cycle.
    ///
    /// `write_request` fills the serialization buffer and returns the payload size;
    /// `read_reply` decodes the reply from it.
    pub fn call_typed_function_synchronously<T>(
        &self,
        opcode: i32,
        write_request: impl FnOnce(&SerializationContext) -> usize,
        read_reply: impl FnOnce(&SerializationContext, ReplyInfo) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.call_lock.lock();
        let size = write_request(&self.serialization);
        self.serialization.set_data_size(size);

        let request = self.request(opcode);
        let request_id = request.request_id;
        let (tx, rx) = crossbeam_channel::bounded(1);
        let callback: ReplyCallback = Box::new(move |info| {
            let _ = tx.try_send(info);
        });
        let channel = self.sender.send(&request, Some(callback))?;
        tracing::trace!(
            uri = self.definition.uri,
            opcode,
            request_id,
            ?channel,
            "Waiting for extension reply"
        );

        let info = rx.recv().map_err(|_| XsError::CallAbandoned {
            uri: self.definition.uri.to_string(),
            opcode,
            request_id,
        })?;
        read_reply(&self.serialization, info)
    }

    pub fn call_void_function_synchronously(
        &self,
        opcode: i32,
        write_request: impl FnOnce(&SerializationContext) -> usize,
    ) -> Result<()> {
        self.call_typed_function_synchronously(opcode, write_request, |_, _| Ok(()))
    }

    /// Sends a request that has no reply. Registers no callback and never waits: when another
    /// call on this extension holds the serialization buffer it fails with
    /// [`Busy`](XsError::Busy) and sends nothing.
    pub fn fire_void_function_and_forget(
        &self,
        opcode: i32,
        write_request: impl FnOnce(&SerializationContext) -> usize,
    ) -> Result<()> {
        let Some(_guard) = self.call_lock.try_lock() else {
            tracing::warn!(
                uri = self.definition.uri,
                opcode,
                "Extension busy, notification not sent"
            );
            return Err(XsError::Busy {
                uri: self.definition.uri.to_string(),
                opcode,
            });
        };
        let size = write_request(&self.serialization);
        self.serialization.set_data_size(size);
        let request = self.request(opcode);
        self.sender.send(&request, None)?;
        Ok(())
    }

    /// Builds a [`MalformedReply`](XsError::MalformedReply) for this extension.
    pub fn malformed(&self, opcode: i32, reason: impl Into<String>) -> XsError {
        XsError::MalformedReply {
            uri: self.definition.uri.to_string(),
            opcode,
            reason: reason.into(),
        }
    }
}

/// Receiving side of one extension.
pub struct RecipientInstance {
    definition: ExtensionDefinition,
    serialization: Arc<SerializationContext>,
}

impl RecipientInstance {
    pub fn new(definition: ExtensionDefinition, serialization: Arc<SerializationContext>) -> Self {
        Self {
            definition,
            serialization,
        }
    }

    pub fn definition(&self) -> &ExtensionDefinition {
        &self.definition
    }

    pub fn serialization(&self) -> &Arc<SerializationContext> {
        &self.serialization
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherRole {
    Client,
    Service,
}

/// Either side of an extension, as returned by the dispatcher lookups.
#[derive(Clone, Copy)]
pub enum AapxsEndpoint<'a> {
    Initiator(&'a Arc<InitiatorInstance>),
    Recipient(&'a RecipientInstance),
}

impl<'a> AapxsEndpoint<'a> {
    pub fn initiator(self) -> Option<&'a Arc<InitiatorInstance>> {
        match self {
            AapxsEndpoint::Initiator(i) => Some(i),
            AapxsEndpoint::Recipient(_) => None,
        }
    }

    pub fn recipient(self) -> Option<&'a RecipientInstance> {
        match self {
            AapxsEndpoint::Recipient(r) => Some(r),
            AapxsEndpoint::Initiator(_) => None,
        }
    }
}

struct DispatcherEntry {
    initiator: Arc<InitiatorInstance>,
    recipient: RecipientInstance,
}

pub struct ExtensionDispatcher {
    role: DispatcherRole,
    entries: Vec<DispatcherEntry>,
}

impl ExtensionDispatcher {
    /// Builds the initiator/recipient pairs for every definition in `registry`.
    ///
    /// Either every extension gets its buffer or none is kept: on failure the buffers already
    /// requested are released again.
    pub fn setup_instances(
        role: DispatcherRole,
        registry: &ExtensionRegistry,
        requester: &mut dyn SharedMemoryRequester,
        sender: Arc<dyn AapxsSender>,
        ids: Arc<RequestIdGenerator>,
    ) -> Result<Self> {
        if !registry.is_frozen() {
            return Err(XsError::ProtocolError(
                "extension registry must be frozen before instance setup".into(),
            ));
        }

        let mut requested: Vec<&'static str> = Vec::with_capacity(registry.len());
        let mut entries = Vec::with_capacity(registry.len());
        for definition in registry.iter() {
            let buffer = if definition.data_capacity == 0 {
                SharedBuffer::anonymous(INLINE_BUFFER_SIZE)
                    .map(Arc::new)
                    .map_err(XsError::Allocation)
            } else {
                requester.request_extension_buffer(definition.uri, definition.data_capacity)
            };
            let buffer = match buffer {
                Ok(buffer) => buffer,
                Err(e) => {
                    tracing::error!(
                        uri = definition.uri,
                        "Failed to allocate extension buffer: {}",
                        e
                    );
                    for uri in requested {
                        requester.release_extension_buffer(uri);
                    }
                    return Err(e);
                }
            };
            if definition.data_capacity > 0 {
                requested.push(definition.uri);
            }

            let serialization = Arc::new(SerializationContext::new(buffer));
            entries.push(DispatcherEntry {
                initiator: Arc::new(InitiatorInstance::new(
                    *definition,
                    Arc::clone(&serialization),
                    Arc::clone(&sender),
                    Arc::clone(&ids),
                )),
                recipient: RecipientInstance::new(*definition, serialization),
            });
        }

        tracing::debug!(?role, extensions = entries.len(), "AAPXS instances set up");
        Ok(Self { role, entries })
    }

    pub fn role(&self) -> DispatcherRole {
        self.role
    }

    fn by_uri(&self, uri: &str) -> Option<&DispatcherEntry> {
        self.entries
            .iter()
            .find(|e| e.initiator.definition.uri == uri)
    }

    fn by_urid(&self, urid: u8) -> Option<&DispatcherEntry> {
        self.entries
            .iter()
            .find(|e| e.initiator.definition.urid == urid)
    }

    fn plugin_side<'a>(&self, entry: &'a DispatcherEntry) -> AapxsEndpoint<'a> {
        match self.role {
            DispatcherRole::Client => AapxsEndpoint::Initiator(&entry.initiator),
            DispatcherRole::Service => AapxsEndpoint::Recipient(&entry.recipient),
        }
    }

    fn host_side<'a>(&self, entry: &'a DispatcherEntry) -> AapxsEndpoint<'a> {
        match self.role {
            DispatcherRole::Client => AapxsEndpoint::Recipient(&entry.recipient),
            DispatcherRole::Service => AapxsEndpoint::Initiator(&entry.initiator),
        }
    }

    pub fn get_plugin_aapxs_by_uri(&self, uri: &str) -> Option<AapxsEndpoint<'_>> {
        self.by_uri(uri).map(|e| self.plugin_side(e))
    }

    pub fn get_plugin_aapxs_by_urid(&self, urid: u8) -> Option<AapxsEndpoint<'_>> {
        self.by_urid(urid).map(|e| self.plugin_side(e))
    }

    pub fn get_host_aapxs_by_uri(&self, uri: &str) -> Option<AapxsEndpoint<'_>> {
        self.by_uri(uri).map(|e| self.host_side(e))
    }

    pub fn get_host_aapxs_by_urid(&self, urid: u8) -> Option<AapxsEndpoint<'_>> {
        self.by_urid(urid).map(|e| self.host_side(e))
    }

    /// Serialization buffer of an extension, whichever side uses it.
    pub fn serialization(&self, uri: &str) -> Option<&Arc<SerializationContext>> {
        self.by_uri(uri).map(|e| &e.recipient.serialization)
    }

    /// `(definition, serialization)` for every extension, in registry order.
    pub fn iter(&self) -> impl Iterator<Item = (&ExtensionDefinition, &Arc<SerializationContext>)> {
        self.entries
            .iter()
            .map(|e| (&e.recipient.definition, &e.recipient.serialization))
    }
}
