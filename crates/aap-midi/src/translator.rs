//! Inbound MIDI translation for a plugin instance.

use crate::convert::Midi1ToUmpConverter;
use crate::mapping::{map_ump_sequence, MappingPolicy, PresetSink};
use crate::ump;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MidiProtocol {
    Midi1 = 1,
    Midi2 = 2,
}

impl MidiProtocol {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Midi1),
            2 => Some(Self::Midi2),
            _ => None,
        }
    }
}

/// Detects a protocol-switching Stream Configuration message at the start of `bytes`.
///
/// Returns the requested protocol (1 or 2), or 0 when there is no such message.
pub fn detect_endpoint_configuration(bytes: &[u8]) -> u8 {
    if bytes.len() < 16 {
        return 0;
    }
    let Some(word0) = ump::read_word(bytes, 0) else {
        return 0;
    };
    if word0 & 0xF005_0000 != 0xF005_0000 {
        return 0;
    }
    if bytes[4..16].iter().any(|b| *b != 0) {
        return 0;
    }
    ((word0 >> 8) & 0x3) as u8
}

enum Source {
    /// Input is already UMP.
    Original,
    /// Converted bytes sit in the translation buffer.
    Translated(usize),
    /// Nothing is forwarded this cycle.
    Nothing,
}

/// Normalizes inbound MIDI to MIDI 2.0 UMP and applies the mapping policy.
///
/// Buffers are allocated once at construction; [`translate`](Self::translate) does not
/// allocate.
pub struct MidiEventTranslator {
    receiver_protocol: MidiProtocol,
    mapping_policy: MappingPolicy,
    converter: Midi1ToUmpConverter,
    translation_buffer: Box<[u8]>,
    mapping_buffer: Box<[u8]>,
}

impl MidiEventTranslator {
    pub fn new(midi_buffer_size: usize, initial_protocol: MidiProtocol) -> Self {
        Self {
            receiver_protocol: initial_protocol,
            mapping_policy: MappingPolicy::NONE,
            converter: Midi1ToUmpConverter::new(),
            translation_buffer: vec![0u8; midi_buffer_size].into_boxed_slice(),
            mapping_buffer: vec![0u8; midi_buffer_size].into_boxed_slice(),
        }
    }

    pub fn receiver_protocol(&self) -> MidiProtocol {
        self.receiver_protocol
    }

    pub fn set_receiver_protocol(&mut self, protocol: MidiProtocol) {
        self.receiver_protocol = protocol;
    }

    pub fn mapping_policy(&self) -> MappingPolicy {
        self.mapping_policy
    }

    pub fn set_mapping_policy(&mut self, policy: MappingPolicy) {
        self.mapping_policy = policy;
    }

    /// Handles protocol negotiation and MIDI 1.0 conversion.
    fn translate_buffer_if_needed(&mut self, bytes: &[u8]) -> Source {
        if bytes.is_empty() {
            return Source::Original;
        }
        if let Some(protocol) = MidiProtocol::from_u8(detect_endpoint_configuration(bytes)) {
            tracing::debug!(?protocol, "Receiver protocol switched");
            self.receiver_protocol = protocol;
            return Source::Nothing;
        }
        if self.receiver_protocol == MidiProtocol::Midi2 {
            return Source::Original;
        }
        match self
            .converter
            .convert(bytes, 0, &mut self.translation_buffer)
        {
            Ok(len) => Source::Translated(len),
            Err(e) => {
                tracing::error!("Failed to translate MIDI 1.0 inputs to MIDI 2.0 UMPs: {}", e);
                Source::Nothing
            }
        }
    }

    /// Translates one inbound buffer. The returned slice is valid until the next call.
    pub fn translate<'a>(&'a mut self, bytes: &'a [u8], presets: &mut dyn PresetSink) -> &'a [u8] {
        let source: &[u8] = match self.translate_buffer_if_needed(bytes) {
            Source::Nothing => return &[],
            Source::Original => bytes,
            Source::Translated(len) => &self.translation_buffer[..len],
        };
        let written = map_ump_sequence(
            source,
            &mut self.mapping_buffer,
            self.mapping_policy,
            presets,
        );
        &self.mapping_buffer[..written]
    }
}
