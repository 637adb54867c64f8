//! # aap - Audio plugin hosting over a process boundary
//!
//! Host-side and service-side plugin instances that talk over a control channel, with
//! extension calls either made directly (while the instance is not processing) or tunneled
//! as MIDI 2.0 SysEx8 through the audio cycle (while it is).
//!
//! ## Architecture
//!
//! `aap` is an umbrella crate over:
//! - **aap-core** - Configuration, instance state machine, lock-free cells
//! - **aap-midi** - UMP buffers, MIDI 1.0 to 2.0 translation, the pending event queue
//! - **aap-xs** - URID registry, shared buffers, AAPXS codec and sessions, standard extensions,
//!   and the control-channel transport
//!
//! ## Quick Start
//!
//! ```ignore
//! use aap::prelude::*;
//! use std::sync::Arc;
//!
//! let context = Arc::new(HostContext::new(HostConfig::default())?);
//! let channel = Arc::new(LoopbackChannel::new(Arc::clone(&context), my_factory));
//!
//! let mut instance = RemotePluginInstance::instantiate(
//!     context, channel, "org.example.synth", ports, Box::new(MyHost),
//! )?;
//! instance.complete_instantiation()?;
//! instance.prepare(512)?;
//! instance.activate()?;
//!
//! // Audio thread
//! instance.process(512, 1_000_000)?;
//! ```

pub mod context;
pub mod error;
pub mod instance;
pub mod loopback;
pub mod plugin;

pub use context::HostContext;
pub use error::{Error, Result};
pub use instance::{LocalPluginInstance, MidiInputHandle, RemotePluginInstance};
pub use loopback::LoopbackChannel;
pub use plugin::{AudioPlugin, PluginBuffer, PluginFactory};

/// Re-export of aap-core for direct access
pub use aap_core as core;
/// Re-export of aap-midi for direct access
pub use aap_midi as midi;
/// Re-export of aap-xs for direct access
pub use aap_xs as xs;

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        AudioPlugin, Error, HostContext, LocalPluginInstance, LoopbackChannel, MidiInputHandle,
        PluginBuffer, PluginFactory, RemotePluginInstance, Result,
    };
    pub use aap_core::{HostConfig, PluginInstantiationState};
    pub use aap_midi::{MappingPolicy, MidiProtocol};
    pub use aap_xs::{
        DirectChannel, HostExtensions, PluginExtensions, PortDirection, PortInfo, TransportChannel,
    };
}
