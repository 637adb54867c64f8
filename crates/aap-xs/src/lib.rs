//! AAPXS: extension calls between an AAP host and its plugins.
//!
//! An extension call is either sent over the [`DirectChannel`] (before activation) or
//! encoded into the realtime MIDI stream as Universal SysEx8 (while active). The pieces:
//!
//! - [`UridMapping`] and [`ExtensionRegistry`]: which extensions exist and their URIDs
//! - [`codec`]: the SysEx8 wire format
//! - [`session`]: initiator/recipient/processor state around the codec
//! - [`ExtensionDispatcher`]: per-instance initiator/recipient pairs and typed calls
//! - [`extensions`]: the standard extensions with their typed clients
//! - [`SharedBufferStore`]: port and extension buffers shared with the peer
//! - [`transport`]: a framed [`DirectChannel`] over Unix sockets
//!
//! # Example
//!
//! ```ignore
//! use aap_xs::{ExtensionRegistry, extensions::PresetsClient};
//!
//! let registry = ExtensionRegistry::standard()?;
//! let presets = PresetsClient::new(initiator);
//! presets.set_preset_index(2)?;
//! ```

pub mod error;
pub use error::{Result, XsError};

pub mod urid;
pub use urid::{UridMapping, MAX_URID_ENTRIES, UNMAPPED};

pub mod registry;
pub use registry::{ExtensionDefinition, ExtensionKind, ExtensionRegistry};

pub mod codec;
pub use codec::{decode_aapxs_sysex8, encode_aapxs_sysex8, AapxsCall};

pub mod port;
pub use port::{ContentType, PortDirection, PortInfo};

pub mod protocol;
pub use protocol::{BufferHandle, ClientMessage, ExtensionMessage, ServiceMessage};

pub mod shared_memory;
pub use shared_memory::{
    AllocationResult, SharedBuffer, SharedBufferStore, SharedMemoryRequester, StoreRole,
};

pub mod serialization;
pub use serialization::SerializationContext;

pub mod dispatcher;
pub use dispatcher::{
    AapxsEndpoint, AapxsRequest, AapxsSender, DispatcherRole, ExtensionDispatcher,
    InitiatorInstance, RecipientInstance, ReplyCallback, ReplyInfo, RequestIdGenerator,
};

pub mod session;
pub use session::{AapxsProcessor, InitiatorSession, PendingRegistrar, RecipientSession, Replies};

pub mod extensions;
pub use extensions::{HostExtensions, PluginExtensions, RequestContext};

pub mod channel;
pub use channel::{dispatch_message, DirectChannel};

pub mod transport;
pub use transport::{serve, MessageTransport, TransportChannel, TransportListener};
