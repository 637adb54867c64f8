//! Service side of a plugin instance.

use super::{encode_request, midi2_inputs, midi2_outputs};
use crate::context::HostContext;
use crate::error::{Error, Result};
use crate::plugin::{AudioPlugin, PluginBuffer};
use aap_core::{
    CallChannel, InstanceEvent, InstanceStateMachine, PluginInstantiationState, TransitionResult,
};
use aap_midi::{MidiBufferView, MidiBufferViewMut, MidiEventQueue};
use aap_xs::extensions::parameters::PARAMETERS_EXTENSION_URI;
use aap_xs::extensions::presets::PRESETS_EXTENSION_URI;
use aap_xs::extensions::{handle_plugin_request, ParametersService, PresetsService};
use aap_xs::{
    AapxsCall, AapxsRequest, AapxsSender, BufferHandle, DispatcherRole, ExtensionDispatcher,
    PluginExtensions, PortInfo, RecipientSession, Replies, ReplyCallback, RequestContext,
    RequestIdGenerator, SharedBufferStore, StoreRole, XsError,
};
use std::sync::Arc;

/// Sends host extension calls (plugin-to-host notifications) through the tunnel.
///
/// There is no direct channel towards the host, so notifications are always queued and reach
/// the host with the next processed cycle.
struct ServiceSender {
    pending: Arc<MidiEventQueue>,
    data_max_size: usize,
}

impl AapxsSender for ServiceSender {
    fn send(
        &self,
        request: &AapxsRequest<'_>,
        callback: Option<ReplyCallback>,
    ) -> aap_xs::Result<CallChannel> {
        if callback.is_some() {
            tracing::warn!(
                uri = request.uri,
                opcode = request.opcode,
                "Host extension calls have no reply, callback dropped"
            );
        }
        let packets = encode_request(request, self.data_max_size)?;
        if !self.pending.push_untimed(&packets) {
            return Err(XsError::QueueFull);
        }
        Ok(CallChannel::Tunnel)
    }
}

/// A plugin instance hosted in this process, driven by a remote client.
pub struct LocalPluginInstance {
    context: Arc<HostContext>,
    plugin_id: String,
    plugin: Box<dyn AudioPlugin>,
    ports: Vec<PortInfo>,
    state: InstanceStateMachine,
    store: SharedBufferStore,
    /// Built once the client has published every extension buffer.
    dispatcher: Option<ExtensionDispatcher>,
    session: RecipientSession,
    pending: Arc<MidiEventQueue>,
    ids: Arc<RequestIdGenerator>,
    buffer: PluginBuffer,
    merge_scratch: Box<[u8]>,
}

impl LocalPluginInstance {
    pub fn new(
        context: Arc<HostContext>,
        instance_id: i32,
        plugin_id: &str,
        plugin: Box<dyn AudioPlugin>,
    ) -> Self {
        let config = context.config();
        let store = SharedBufferStore::with_directory(
            StoreRole::Service,
            &config.shm_prefix,
            context.shm_directory(),
        );
        let ports = plugin.ports();
        let session = RecipientSession::new(config.aapxs_data_max_size, config.midi_buffer_size);
        let pending = Arc::new(MidiEventQueue::new(config.midi_buffer_size));
        let merge_scratch = vec![0u8; config.midi_buffer_size].into_boxed_slice();
        tracing::info!(instance_id, plugin_id, ports = ports.len(), "Instantiated local plugin");
        Self {
            context,
            plugin_id: plugin_id.to_string(),
            plugin,
            ports,
            state: InstanceStateMachine::new(instance_id),
            store,
            dispatcher: None,
            session,
            pending,
            ids: Arc::new(RequestIdGenerator::new()),
            buffer: PluginBuffer::default(),
            merge_scratch,
        }
    }

    pub fn instance_id(&self) -> i32 {
        self.state.instance_id()
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn state(&self) -> PluginInstantiationState {
        self.state.state()
    }

    pub fn ports(&self) -> &[PortInfo] {
        &self.ports
    }

    pub fn plugin(&self) -> &dyn AudioPlugin {
        self.plugin.as_ref()
    }

    pub fn plugin_mut(&mut self) -> &mut dyn AudioPlugin {
        self.plugin.as_mut()
    }

    fn wrong_state(&self, operation: &'static str, state: PluginInstantiationState) -> Error {
        Error::WrongState {
            instance_id: self.instance_id(),
            operation,
            state,
        }
    }

    fn transition(&mut self, event: InstanceEvent) -> Result<TransitionResult> {
        let result = self.state.transition(event);
        result.into_result(self.instance_id())?;
        Ok(result)
    }

    /// Maps the client's serialization buffer for `uri`.
    pub fn add_extension(&mut self, uri: &str, buffer: &BufferHandle) -> Result<()> {
        let current = self.state.state();
        if !self
            .state
            .require(PluginInstantiationState::Initial, "add_extension")
        {
            return Err(self.wrong_state("add_extension", current));
        }
        self.store.add_extension_buffer(uri, buffer)?;
        tracing::debug!(instance_id = self.instance_id(), uri, "Extension buffer mapped");
        Ok(())
    }

    pub fn complete_instantiation(&mut self) -> Result<()> {
        self.transition(InstanceEvent::CompleteInstantiation)?;
        let sender = Arc::new(ServiceSender {
            pending: Arc::clone(&self.pending),
            data_max_size: self.context.config().aapxs_data_max_size,
        });
        self.dispatcher = Some(ExtensionDispatcher::setup_instances(
            DispatcherRole::Service,
            self.context.registry(),
            &mut self.store,
            sender,
            Arc::clone(&self.ids),
        )?);
        Ok(())
    }

    /// Maps the client's port buffers and hands them to the plugin.
    pub fn prepare(&mut self, frame_count: usize, buffers: &[BufferHandle]) -> Result<()> {
        self.transition(InstanceEvent::Prepare)?;
        if buffers.len() != self.ports.len() {
            return Err(Error::PortMismatch {
                expected: self.ports.len(),
                actual: buffers.len(),
            });
        }
        let result = self.store.allocate_service_buffers(buffers);
        if !result.is_success() {
            tracing::error!(instance_id = self.instance_id(), "Port mapping failed: {}", result);
            return Err(Error::Allocation(result));
        }
        self.buffer = PluginBuffer::new(frame_count, self.store.ports().to_vec());
        self.plugin.prepare(&self.buffer);
        Ok(())
    }

    pub fn activate(&mut self) -> Result<()> {
        if let TransitionResult::Changed(_) = self.transition(InstanceEvent::Activate)? {
            self.plugin.activate();
        }
        Ok(())
    }

    pub fn deactivate(&mut self) -> Result<()> {
        if let TransitionResult::Changed(_) = self.transition(InstanceEvent::Deactivate)? {
            self.plugin.deactivate();
        }
        Ok(())
    }

    pub fn dispose(&mut self) -> Result<()> {
        let was_active = self.state.state() == PluginInstantiationState::Active;
        if let TransitionResult::Changed(_) = self.transition(InstanceEvent::Dispose)? {
            if was_active {
                self.plugin.deactivate();
            }
            self.dispatcher = None;
            self.buffer = PluginBuffer::default();
            self.store.dispose();
        }
        Ok(())
    }

    /// Runs one extension call that arrived over the direct channel. The request payload is
    /// already in the shared extension buffer. Returns the reply payload size.
    pub fn handle_extension_message(
        &mut self,
        uri: &str,
        opcode: i32,
        request_id: u32,
        data_size: usize,
    ) -> Result<usize> {
        let current = self.state.state();
        let Some(dispatcher) = self.dispatcher.as_ref() else {
            tracing::error!(
                instance_id = self.instance_id(),
                uri,
                opcode,
                state = %current,
                "Extension call before instantiation completed"
            );
            return Err(self.wrong_state("handle_extension_message", current));
        };
        let recipient = dispatcher
            .get_plugin_aapxs_by_uri(uri)
            .and_then(|endpoint| endpoint.recipient())
            .ok_or_else(|| XsError::UnknownExtension(uri.to_string()))?;

        let serialization = recipient.serialization();
        serialization.set_data_size(data_size);
        let definition = recipient.definition();
        let ctx = RequestContext {
            request_id,
            urid: definition.urid,
            uri: definition.uri,
            opcode,
            serialization,
        };
        let reply = handle_plugin_request(definition.kind, self.plugin.as_mut(), &ctx);
        Ok(reply.unwrap_or(0))
    }

    /// Runs one audio cycle.
    ///
    /// Tunneled extension calls in the MIDI2 input ports are handled first, then the plugin
    /// processes. Their replies and any queued host notifications are added to the first MIDI2
    /// output port afterwards. Tunnel messages stay in the input for the plugin to see.
    pub fn process(&mut self, frame_count: usize, timeout_ns: u64) -> Result<()> {
        let current = self.state.state();
        if !self.state.require(PluginInstantiationState::Active, "process") {
            return Err(self.wrong_state("process", current));
        }

        let instance_id = self.instance_id();
        let Self {
            plugin,
            ports,
            dispatcher,
            session,
            buffer,
            ..
        } = self;
        let Some(dispatcher) = dispatcher.as_ref() else {
            return Err(Error::WrongState {
                instance_id,
                operation: "process",
                state: current,
            });
        };

        session.clear_replies();
        for index in midi2_inputs(ports) {
            buffer.with_port(index, |bytes| {
                let ump = MidiBufferView::new(bytes).ump();
                session.process(ump, &mut |call: &AapxsCall<'_>, replies: &mut Replies<'_>| {
                    handle_tunnel_call(dispatcher, plugin.as_mut(), call, replies)
                });
            });
        }
        for index in midi2_outputs(ports) {
            buffer.with_port_mut(index, |bytes| MidiBufferViewMut::new(bytes).clear());
        }

        plugin.process(buffer, frame_count, timeout_ns);

        let first_output = midi2_outputs(&self.ports).next();
        if let Some(index) = first_output {
            let Self {
                session,
                pending,
                buffer,
                merge_scratch,
                ..
            } = self;
            buffer.with_port_mut(index, |bytes| {
                if !MidiBufferViewMut::new(&mut *bytes).append(session.replies()) {
                    tracing::error!("MIDI output port is full, AAPXS replies dropped");
                }
                pending.merge_into(bytes, merge_scratch);
            });
        } else if !self.session.replies().is_empty() {
            tracing::warn!(
                instance_id = self.instance_id(),
                "No MIDI2 output port, AAPXS replies dropped"
            );
        }
        Ok(())
    }

    fn host_initiator(&self, uri: &str) -> Option<Arc<aap_xs::InitiatorInstance>> {
        self.dispatcher
            .as_ref()?
            .get_host_aapxs_by_uri(uri)
            .and_then(|endpoint| endpoint.initiator())
            .cloned()
    }

    /// Preset notifications towards the host. `None` before instantiation completes.
    pub fn presets_service(&self) -> Option<PresetsService> {
        self.host_initiator(PRESETS_EXTENSION_URI)
            .map(PresetsService::new)
    }

    pub fn parameters_service(&self) -> Option<ParametersService> {
        self.host_initiator(PARAMETERS_EXTENSION_URI)
            .map(ParametersService::new)
    }
}

fn handle_tunnel_call<P: PluginExtensions + ?Sized>(
    dispatcher: &ExtensionDispatcher,
    plugin: &mut P,
    call: &AapxsCall<'_>,
    replies: &mut Replies<'_>,
) {
    if call.opcode < 0 {
        tracing::trace!(uri = call.uri, opcode = call.opcode, "Ignoring host-side message");
        return;
    }
    let Some(recipient) = dispatcher
        .get_plugin_aapxs_by_uri(call.uri)
        .and_then(|endpoint| endpoint.recipient())
    else {
        tracing::warn!(uri = call.uri, opcode = call.opcode, "Request for unknown extension");
        return;
    };
    let serialization = recipient.serialization();
    if !serialization.copy_from(call.data) {
        tracing::error!(uri = call.uri, opcode = call.opcode, "Request does not fit");
        return;
    }
    let definition = recipient.definition();
    let ctx = RequestContext {
        request_id: call.request_id,
        urid: definition.urid,
        uri: definition.uri,
        opcode: call.opcode,
        serialization,
    };
    if let Some(size) = handle_plugin_request(definition.kind, plugin, &ctx) {
        serialization.with_data(|data| replies.add_reply(call, &data[..size.min(data.len())]));
    }
}
