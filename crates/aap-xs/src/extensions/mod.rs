//! Standard extensions.
//!
//! Each module defines an extension's URI, buffer capacity and opcodes, the trait a plugin
//! (or host) implements, the request handler that decodes payloads from the serialization
//! buffer, and the typed client used by the calling side.
//!
//! Request handlers return the reply payload size, or `None` when the opcode has no reply.
//! A missing extension is logged and answered with default values, so a blocked caller
//! still resumes.

pub mod gui;
pub mod midi;
pub mod parameters;
pub mod presets;
pub mod state;
pub mod urid;

use crate::registry::ExtensionKind;
use crate::serialization::SerializationContext;

pub use gui::{GuiClient, GuiExtension};
pub use midi::{MidiClient, MidiExtension};
pub use parameters::{
    ParameterEnumeration, ParameterInfo, ParametersClient, ParametersExtension,
    ParametersHostExtension, ParametersService,
};
pub use presets::{PresetInfo, PresetsClient, PresetsExtension, PresetsHostExtension, PresetsService};
pub use state::{StateClient, StateExtension};
pub use urid::{UridClient, UridExtension};

/// One incoming call. The request payload is in `serialization`, and the reply overwrites it.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub request_id: u32,
    pub urid: u8,
    pub uri: &'a str,
    pub opcode: i32,
    pub serialization: &'a SerializationContext,
}

impl RequestContext<'_> {
    pub fn data_size(&self) -> usize {
        self.serialization.data_size()
    }
}

/// Extensions a plugin exposes. Everything defaults to "not supported".
pub trait PluginExtensions {
    fn state(&mut self) -> Option<&mut dyn StateExtension> {
        None
    }

    fn presets(&mut self) -> Option<&mut dyn PresetsExtension> {
        None
    }

    fn parameters(&mut self) -> Option<&mut dyn ParametersExtension> {
        None
    }

    fn midi(&mut self) -> Option<&mut dyn MidiExtension> {
        None
    }

    fn gui(&mut self) -> Option<&mut dyn GuiExtension> {
        None
    }

    fn urid(&mut self) -> Option<&mut dyn UridExtension> {
        None
    }
}

/// Extensions a host exposes to its plugins.
pub trait HostExtensions {
    fn presets_host(&mut self) -> Option<&mut dyn PresetsHostExtension> {
        None
    }

    fn parameters_host(&mut self) -> Option<&mut dyn ParametersHostExtension> {
        None
    }
}

/// Host with no extensions.
impl HostExtensions for () {}

fn warn_missing(ctx: &RequestContext<'_>) {
    tracing::warn!(
        uri = ctx.uri,
        opcode = ctx.opcode,
        request_id = ctx.request_id,
        "Extension is not implemented, replying with defaults"
    );
}

/// Answers an opcode the extension does not define with an empty reply.
pub(crate) fn unknown_opcode(ctx: &RequestContext<'_>) -> Option<usize> {
    tracing::warn!(
        uri = ctx.uri,
        opcode = ctx.opcode,
        request_id = ctx.request_id,
        "Unknown opcode"
    );
    Some(0)
}

/// Routes a request for a plugin extension to `plugin`.
pub fn handle_plugin_request<P: PluginExtensions + ?Sized>(
    kind: ExtensionKind,
    plugin: &mut P,
    ctx: &RequestContext<'_>,
) -> Option<usize> {
    macro_rules! route {
        ($accessor:ident, $module:ident) => {{
            let ext = plugin.$accessor();
            if ext.is_none() {
                warn_missing(ctx);
            }
            $module::handle_request(ext, ctx)
        }};
    }

    match kind {
        ExtensionKind::State => route!(state, state),
        ExtensionKind::Presets => route!(presets, presets),
        ExtensionKind::Parameters => route!(parameters, parameters),
        ExtensionKind::Midi => route!(midi, midi),
        ExtensionKind::Gui => route!(gui, gui),
        ExtensionKind::Urid => route!(urid, urid),
    }
}

/// Routes a request for a host extension to `host`. Host requests never reply.
pub fn handle_host_request<H: HostExtensions + ?Sized>(
    kind: ExtensionKind,
    host: &mut H,
    ctx: &RequestContext<'_>,
) -> Option<usize> {
    match kind {
        ExtensionKind::Presets => match host.presets_host() {
            Some(ext) => presets::handle_host_request(ext, ctx),
            None => {
                warn_missing(ctx);
                None
            }
        },
        ExtensionKind::Parameters => match host.parameters_host() {
            Some(ext) => parameters::handle_host_request(ext, ctx),
            None => {
                warn_missing(ctx);
                None
            }
        },
        _ => {
            tracing::warn!(uri = ctx.uri, opcode = ctx.opcode, "No host side for extension");
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory initiator wiring for the typed-client tests.

    use super::*;
    use crate::dispatcher::{
        AapxsRequest, AapxsSender, InitiatorInstance, ReplyCallback, ReplyInfo,
        RequestIdGenerator,
    };
    use crate::error::Result;
    use crate::registry::{ExtensionDefinition, ExtensionRegistry};
    use crate::shared_memory::SharedBuffer;
    use aap_core::CallChannel;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Sender that runs the request handler against `plugin` on the calling thread.
    pub struct DirectPluginSender<P> {
        pub plugin: Mutex<P>,
        pub kind: ExtensionKind,
    }

    impl<P: PluginExtensions + Send> AapxsSender for DirectPluginSender<P> {
        fn send(
            &self,
            request: &AapxsRequest<'_>,
            callback: Option<ReplyCallback>,
        ) -> Result<CallChannel> {
            let ctx = RequestContext {
                request_id: request.request_id,
                urid: request.urid,
                uri: request.uri,
                opcode: request.opcode,
                serialization: request.serialization,
            };
            let reply = handle_plugin_request(self.kind, &mut *self.plugin.lock(), &ctx);
            if let (Some(size), Some(callback)) = (reply, callback) {
                request.serialization.set_data_size(size);
                callback(ReplyInfo {
                    request_id: request.request_id,
                    opcode: request.opcode,
                    data_size: size,
                });
            }
            Ok(CallChannel::Direct)
        }
    }

    pub fn initiator_for<P: PluginExtensions + Send + 'static>(
        kind: ExtensionKind,
        plugin: P,
    ) -> (Arc<InitiatorInstance>, Arc<DirectPluginSender<P>>) {
        let registry = ExtensionRegistry::standard().unwrap();
        let definition: ExtensionDefinition = *registry
            .get_by_uri(kind.uri())
            .unwrap_or_else(|| panic!("{:?} is registered", kind));
        let buffer = Arc::new(SharedBuffer::anonymous(definition.data_capacity).unwrap());
        let sender = Arc::new(DirectPluginSender {
            plugin: Mutex::new(plugin),
            kind,
        });
        let initiator = Arc::new(InitiatorInstance::new(
            definition,
            Arc::new(SerializationContext::new(buffer)),
            sender.clone(),
            Arc::new(RequestIdGenerator::new()),
        ));
        (initiator, sender)
    }

    /// Serialization context for handler tests.
    pub fn context(kind: ExtensionKind) -> SerializationContext {
        SerializationContext::new(Arc::new(
            SharedBuffer::anonymous(kind.data_capacity()).unwrap(),
        ))
    }

    pub fn request<'a>(
        kind: ExtensionKind,
        opcode: i32,
        serialization: &'a SerializationContext,
    ) -> RequestContext<'a> {
        RequestContext {
            request_id: 1,
            urid: 1,
            uri: kind.uri(),
            opcode,
            serialization,
        }
    }
}
