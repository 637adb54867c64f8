//! UMP plumbing for AAP instances.
//!
//! - [`ump`]: message sizing, iteration, JR timestamps
//! - [`sysex8`]: SysEx8 packet forging and reassembly
//! - [`buffer`]: the MIDI port buffer header
//! - [`merge`] and [`queue`]: realtime-safe input hand-off
//! - [`convert`], [`mapping`] and [`translator`]: MIDI 1.0 to UMP translation and
//!   parameter/preset mapping
//!
//! Everything on the audio path works on caller-provided byte slices and never allocates.

pub mod error;
pub use error::{Error, Result};

pub mod buffer;
pub mod convert;
pub mod mapping;
pub mod merge;
pub mod midi2;
pub mod queue;
pub mod sysex8;
pub mod translator;
pub mod ump;

pub use buffer::{MidiBufferHeader, MidiBufferView, MidiBufferViewMut, MIDI_BUFFER_HEADER_SIZE};
pub use convert::Midi1ToUmpConverter;
pub use mapping::{map_ump_sequence, MappingPolicy, ParameterChange, PresetSink};
pub use merge::{merge_ump_sequences, MergeResult};
pub use self::midi2::{ChannelVoice2, ChannelVoice2Kind};
pub use queue::MidiEventQueue;
pub use sysex8::{forge_sysex8, read_sysex8, Sysex8Packet, Sysex8Read};
pub use translator::{detect_endpoint_configuration, MidiEventTranslator, MidiProtocol};
