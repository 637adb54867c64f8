//! Client side of a plugin instance.

use super::{encode_request, midi2_inputs, midi2_outputs};
use crate::context::HostContext;
use crate::error::{Error, Result};
use crate::plugin::PluginBuffer;
use aap_core::{
    channel_for, AtomicInstantiationState, CallChannel, InstanceEvent, InstanceStateMachine,
    PluginInstantiationState, TransitionResult,
};
use aap_midi::{
    MappingPolicy, MidiBufferView, MidiBufferViewMut, MidiEventQueue, MidiEventTranslator,
    MidiProtocol, PresetSink,
};
use aap_xs::extensions::presets::{OPCODE_SET_PRESET_INDEX, PRESETS_EXTENSION_URI};
use aap_xs::extensions::{
    gui, handle_host_request, midi, parameters, state, urid, GuiClient, MidiClient,
    ParametersClient, PresetsClient, StateClient, UridClient,
};
use aap_xs::{
    encode_aapxs_sysex8, AapxsCall, AapxsRequest, AapxsSender, DirectChannel, DispatcherRole,
    ExtensionDispatcher, ExtensionMessage, HostExtensions, InitiatorInstance, InitiatorSession,
    PendingRegistrar, PortInfo, ReplyCallback, ReplyInfo, RequestContext, RequestIdGenerator,
    SharedBufferStore, StoreRole,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Routes extension calls by instance state: direct while inactive, tunneled while active.
struct ClientSender {
    instance_id: i32,
    state: Arc<AtomicInstantiationState>,
    channel: Arc<dyn DirectChannel>,
    registrar: PendingRegistrar,
    pending: Arc<MidiEventQueue>,
    data_max_size: usize,
}

impl AapxsSender for ClientSender {
    fn send(
        &self,
        request: &AapxsRequest<'_>,
        callback: Option<ReplyCallback>,
    ) -> aap_xs::Result<CallChannel> {
        let channel = channel_for(self.state.get());
        match channel {
            CallChannel::Direct => {
                let message = ExtensionMessage {
                    instance_id: self.instance_id,
                    uri: request.uri.to_string(),
                    opcode: request.opcode,
                    request_id: request.request_id,
                    data_size: request.serialization.data_size(),
                };
                let data_size = self.channel.extension(&message)?;
                request.serialization.set_data_size(data_size);
                if let Some(callback) = callback {
                    callback(ReplyInfo {
                        request_id: request.request_id,
                        opcode: request.opcode,
                        data_size,
                    });
                }
            }
            CallChannel::Tunnel => {
                let packets = encode_request(request, self.data_max_size)?;
                // The reply can arrive in the very next cycle, so park the callback first.
                if let Some(callback) = callback {
                    self.registrar.register(request.request_id, callback)?;
                }
                if !self.pending.push_untimed(&packets) {
                    return Err(aap_xs::XsError::QueueFull);
                }
            }
        }
        Ok(channel)
    }
}

/// Turns Program Change input into preset selections.
struct InstancePresetSink {
    state: Arc<AtomicInstantiationState>,
    presets: Option<PresetsClient>,
    ids: Arc<RequestIdGenerator>,
    scratch: Box<[u8]>,
}

impl PresetSink for InstancePresetSink {
    fn set_preset_index(&mut self, preset_index: i32, dst: &mut [u8]) -> usize {
        if self.state.get() == PluginInstantiationState::Active {
            let written = encode_aapxs_sysex8(
                dst,
                &mut self.scratch,
                0,
                self.ids.next_id(),
                PRESETS_EXTENSION_URI,
                OPCODE_SET_PRESET_INDEX,
                &preset_index.to_le_bytes(),
            );
            if written == 0 {
                tracing::warn!(preset_index, "No room for the preset change, dropped");
            }
            return written;
        }
        match &self.presets {
            Some(presets) => {
                if let Err(e) = presets.set_preset_index(preset_index) {
                    tracing::warn!(preset_index, "Failed to select preset: {}", e);
                }
            }
            None => tracing::warn!(preset_index, "Presets extension is not registered"),
        }
        0
    }
}

struct MidiInput {
    translator: MidiEventTranslator,
    sink: InstancePresetSink,
}

/// Producer side of an instance's MIDI input, for threads other than the audio thread.
///
/// Cloneable and shareable. Input queued here reaches the plugin with the next
/// [`RemotePluginInstance::process`], which only try-locks the queue.
#[derive(Clone)]
pub struct MidiInputHandle {
    input: Arc<Mutex<MidiInput>>,
    pending: Arc<MidiEventQueue>,
}

impl MidiInputHandle {
    /// See [`MidiInputHandle::add_midi_input`].
    pub fn add_midi_input(&self, bytes: &[u8], timestamp_nanos: u64) -> bool {
        self.input.add_midi_input(bytes, timestamp_nanos)
    }

    /// Protocol assumed for [`add_midi_input`](Self::add_midi_input) until the input
    /// negotiates another one.
    pub fn set_input_protocol(&self, protocol: MidiProtocol) {
        self.input.lock().translator.set_receiver_protocol(protocol);
    }

    pub fn mapping_policy(&self) -> MappingPolicy {
        self.input.lock().translator.mapping_policy()
    }

    pub fn set_mapping_policy(&self, policy: MappingPolicy) {
        self.input.lock().translator.set_mapping_policy(policy);
    }
}

/// Per-instance state set up right after the remote instance exists.
struct Connection {
    state: InstanceStateMachine,
    store: SharedBufferStore,
    dispatcher: ExtensionDispatcher,
    session: InitiatorSession,
    pending: Arc<MidiEventQueue>,
    input: MidiInput,
}

impl Connection {
    fn open(
        context: &HostContext,
        channel: &Arc<dyn DirectChannel>,
        instance_id: i32,
    ) -> Result<Self> {
        let config = context.config();
        let state = InstanceStateMachine::new(instance_id);
        let session = InitiatorSession::new(config.aapxs_data_max_size, config.max_pending_callbacks);
        let pending = Arc::new(MidiEventQueue::new(config.midi_buffer_size));
        let ids = Arc::new(RequestIdGenerator::new());
        let sender = Arc::new(ClientSender {
            instance_id,
            state: state.state_handle(),
            channel: Arc::clone(channel),
            registrar: session.registrar(),
            pending: Arc::clone(&pending),
            data_max_size: config.aapxs_data_max_size,
        });

        let mut store = SharedBufferStore::with_directory(
            StoreRole::Client,
            &config.shm_prefix,
            context.shm_directory(),
        );
        let dispatcher = ExtensionDispatcher::setup_instances(
            DispatcherRole::Client,
            context.registry(),
            &mut store,
            sender,
            Arc::clone(&ids),
        )?;
        for (uri, handle) in store.extension_handles() {
            channel.add_extension(instance_id, &uri, &handle)?;
        }

        let presets = dispatcher
            .get_plugin_aapxs_by_uri(PRESETS_EXTENSION_URI)
            .and_then(|endpoint| endpoint.initiator())
            .map(|initiator| PresetsClient::new(Arc::clone(initiator)));
        let input = MidiInput {
            translator: MidiEventTranslator::new(config.midi_buffer_size, MidiProtocol::Midi2),
            sink: InstancePresetSink {
                state: state.state_handle(),
                presets,
                ids,
                scratch: vec![0u8; config.aapxs_data_max_size].into_boxed_slice(),
            },
        };
        Ok(Self {
            state,
            store,
            dispatcher,
            session,
            pending,
            input,
        })
    }
}

/// The host's handle to one plugin instance behind a [`DirectChannel`].
///
/// Lifecycle calls (`complete_instantiation`, `prepare`, `activate`, `deactivate`, `dispose`)
/// come from a control thread. [`process`](Self::process) comes from the audio thread.
/// Typed extension clients can be used from any other thread; while the instance is active
/// their calls complete in a later `process` cycle.
pub struct RemotePluginInstance {
    context: Arc<HostContext>,
    plugin_id: String,
    ports: Vec<PortInfo>,
    channel: Arc<dyn DirectChannel>,
    state: InstanceStateMachine,
    store: SharedBufferStore,
    dispatcher: ExtensionDispatcher,
    session: InitiatorSession,
    pending: Arc<MidiEventQueue>,
    input: MidiInputHandle,
    host: Box<dyn HostExtensions + Send>,
    buffer: PluginBuffer,
    merge_scratch: Box<[u8]>,
}

impl RemotePluginInstance {
    /// Creates the remote instance and publishes its extension buffers.
    ///
    /// The instance starts in `INITIAL`. On failure the remote instance is disposed again.
    pub fn instantiate(
        context: Arc<HostContext>,
        channel: Arc<dyn DirectChannel>,
        plugin_id: &str,
        ports: Vec<PortInfo>,
        host: Box<dyn HostExtensions + Send>,
    ) -> Result<Self> {
        let instance_id = channel.instantiate(plugin_id, context.config().sample_rate)?;
        let connection = match Connection::open(&context, &channel, instance_id) {
            Ok(connection) => connection,
            Err(e) => {
                tracing::error!(instance_id, plugin_id, "Instance setup failed: {}", e);
                if let Err(dispose_err) = channel.dispose(instance_id) {
                    tracing::warn!(instance_id, "Dispose after failed setup: {}", dispose_err);
                }
                return Err(e);
            }
        };
        tracing::info!(instance_id, plugin_id, "Instantiated remote plugin");

        let merge_size = context.config().midi_buffer_size;
        Ok(Self {
            context,
            plugin_id: plugin_id.to_string(),
            ports,
            channel,
            state: connection.state,
            store: connection.store,
            dispatcher: connection.dispatcher,
            session: connection.session,
            input: MidiInputHandle {
                input: Arc::new(Mutex::new(connection.input)),
                pending: Arc::clone(&connection.pending),
            },
            pending: connection.pending,
            host,
            buffer: PluginBuffer::default(),
            merge_scratch: vec![0u8; merge_size].into_boxed_slice(),
        })
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

    /// Port buffers shared with the plugin. Empty until [`prepare`](Self::prepare).
    pub fn buffer(&self) -> &PluginBuffer {
        &self.buffer
    }

    /// Tunnel callbacks waiting for a reply.
    pub fn pending_callbacks(&self) -> usize {
        self.session.pending_count()
    }

    fn transition(&mut self, event: InstanceEvent) -> Result<TransitionResult> {
        let result = self.state.transition(event);
        result.into_result(self.instance_id())?;
        Ok(result)
    }

    pub fn complete_instantiation(&mut self) -> Result<()> {
        self.transition(InstanceEvent::CompleteInstantiation)?;
        self.channel.complete_instantiation(self.instance_id())?;
        self.refresh_mapping_policy();
        Ok(())
    }

    /// Asks the plugin which MIDI messages it consumes itself. Falls back to
    /// [`MappingPolicy::NONE`] when the plugin does not answer.
    pub fn refresh_mapping_policy(&self) {
        let policy = match self.midi().map(|m| m.get_mapping_policy(&self.plugin_id)) {
            Some(Ok(policy)) => policy,
            Some(Err(e)) => {
                tracing::warn!(instance_id = self.instance_id(), "No mapping policy: {}", e);
                MappingPolicy::NONE
            }
            None => MappingPolicy::NONE,
        };
        self.input.set_mapping_policy(policy);
    }

    pub fn mapping_policy(&self) -> MappingPolicy {
        self.input.mapping_policy()
    }

    pub fn set_mapping_policy(&self, policy: MappingPolicy) {
        self.input.set_mapping_policy(policy);
    }

    /// See [`MidiInputHandle::set_input_protocol`].
    pub fn set_input_protocol(&self, protocol: MidiProtocol) {
        self.input.set_input_protocol(protocol);
    }

    /// Handle for feeding MIDI input from other threads while the audio thread processes.
    pub fn midi_input(&self) -> MidiInputHandle {
        self.input.clone()
    }

    /// Allocates the port buffers and hands them to the plugin.
    pub fn prepare(&mut self, frame_count: usize) -> Result<()> {
        self.transition(InstanceEvent::Prepare)?;
        // Old buffers unlink their backing files on drop, which share names with the new ones.
        self.buffer = PluginBuffer::default();
        let result = self.store.allocate_client_buffers(
            &self.ports,
            frame_count,
            self.context.config().default_control_buffer_size,
        );
        if !result.is_success() {
            tracing::error!(instance_id = self.instance_id(), "Port allocation failed: {}", result);
            return Err(Error::Allocation(result));
        }
        self.buffer = PluginBuffer::new(frame_count, self.store.ports().to_vec());
        self.channel
            .prepare(self.instance_id(), frame_count, &self.store.handles())?;
        Ok(())
    }

    pub fn activate(&mut self) -> Result<()> {
        if let TransitionResult::Changed(_) = self.transition(InstanceEvent::Activate)? {
            self.channel.activate(self.instance_id())?;
        }
        Ok(())
    }

    /// Tunneled calls still queued when the instance deactivates stay pending until it is
    /// active and processing again.
    pub fn deactivate(&mut self) -> Result<()> {
        if let TransitionResult::Changed(_) = self.transition(InstanceEvent::Deactivate)? {
            self.channel.deactivate(self.instance_id())?;
        }
        Ok(())
    }

    pub fn dispose(&mut self) -> Result<()> {
        if let TransitionResult::Changed(_) = self.transition(InstanceEvent::Dispose)? {
            self.buffer = PluginBuffer::default();
            self.store.dispose();
            self.channel.dispose(self.instance_id())?;
        }
        Ok(())
    }

    /// See [`MidiInputHandle::add_midi_input`].
    pub fn add_midi_input(&self, bytes: &[u8], timestamp_nanos: u64) -> bool {
        self.input.add_midi_input(bytes, timestamp_nanos)
    }

    /// Runs one audio cycle.
    ///
    /// Queued input (MIDI and tunneled extension calls) is merged into the first MIDI2 input
    /// port, the plugin processes, and tunnel replies and host requests found in the MIDI2
    /// output ports are completed. MIDI2 input ports are consumed: they are empty once this
    /// returns.
    pub fn process(&mut self, frame_count: usize, timeout_ns: u64) -> Result<()> {
        let current = self.state.state();
        if !self.state.require(PluginInstantiationState::Active, "process") {
            return Err(Error::WrongState {
                instance_id: self.instance_id(),
                operation: "process",
                state: current,
            });
        }

        let first_input = midi2_inputs(&self.ports).next();
        if let Some(index) = first_input {
            let Self {
                buffer,
                pending,
                merge_scratch,
                ..
            } = self;
            buffer.with_port_mut(index, |bytes| pending.merge_into(bytes, merge_scratch));
        }

        let result = self
            .channel
            .process(self.instance_id(), frame_count, timeout_ns);

        let Self {
            ports,
            buffer,
            session,
            dispatcher,
            host,
            ..
        } = self;
        let dispatcher = &*dispatcher;
        for index in midi2_outputs(ports) {
            buffer.with_port(index, |bytes| {
                let ump = MidiBufferView::new(bytes).ump();
                let mut on_reply = |call: &AapxsCall<'_>| store_reply(dispatcher, call);
                let mut on_request =
                    |call: &AapxsCall<'_>| handle_host_call(dispatcher, host.as_mut(), call);
                session.complete_session(ump, &mut on_reply, &mut on_request);
            });
        }
        for index in midi2_inputs(ports) {
            buffer.with_port_mut(index, |bytes| MidiBufferViewMut::new(bytes).clear());
        }

        result.map_err(Error::from)
    }

    fn initiator(&self, uri: &str) -> Option<Arc<InitiatorInstance>> {
        self.dispatcher
            .get_plugin_aapxs_by_uri(uri)
            .and_then(|endpoint| endpoint.initiator())
            .cloned()
    }

    pub fn presets(&self) -> Option<PresetsClient> {
        self.initiator(PRESETS_EXTENSION_URI).map(PresetsClient::new)
    }

    pub fn state_extension(&self) -> Option<StateClient> {
        self.initiator(state::STATE_EXTENSION_URI).map(StateClient::new)
    }

    pub fn parameters(&self) -> Option<ParametersClient> {
        self.initiator(parameters::PARAMETERS_EXTENSION_URI)
            .map(ParametersClient::new)
    }

    pub fn midi(&self) -> Option<MidiClient> {
        self.initiator(midi::MIDI_EXTENSION_URI).map(MidiClient::new)
    }

    pub fn gui(&self) -> Option<GuiClient> {
        self.initiator(gui::GUI_EXTENSION_URI).map(GuiClient::new)
    }

    pub fn urid(&self) -> Option<UridClient> {
        self.initiator(urid::URID_EXTENSION_URI).map(UridClient::new)
    }
}

impl Drop for RemotePluginInstance {
    fn drop(&mut self) {
        if self.state.state() != PluginInstantiationState::Terminated {
            if let Err(e) = self.dispose() {
                tracing::warn!(instance_id = self.instance_id(), "Dispose on drop failed: {}", e);
            }
        }
    }
}

/// Copies a reply payload into the initiator's buffer before its callback fires.
fn store_reply(dispatcher: &ExtensionDispatcher, call: &AapxsCall<'_>) {
    let Some(initiator) = dispatcher
        .get_plugin_aapxs_by_uri(call.uri)
        .and_then(|endpoint| endpoint.initiator())
    else {
        tracing::warn!(uri = call.uri, request_id = call.request_id, "Reply for unknown extension");
        return;
    };
    if !initiator.serialization().copy_from(call.data) {
        tracing::error!(
            uri = call.uri,
            request_id = call.request_id,
            size = call.data.len(),
            "Reply does not fit the extension buffer"
        );
    }
}

fn handle_host_call(
    dispatcher: &ExtensionDispatcher,
    host: &mut (dyn HostExtensions + Send),
    call: &AapxsCall<'_>,
) {
    let Some(recipient) = dispatcher
        .get_host_aapxs_by_uri(call.uri)
        .and_then(|endpoint| endpoint.recipient())
    else {
        tracing::warn!(uri = call.uri, opcode = call.opcode, "Host request for unknown extension");
        return;
    };
    let serialization = recipient.serialization();
    if !serialization.copy_from(call.data) {
        tracing::error!(uri = call.uri, opcode = call.opcode, "Host request does not fit");
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
    handle_host_request(definition.kind, host, &ctx);
}
