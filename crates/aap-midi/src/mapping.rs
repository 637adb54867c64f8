//! Parameter and preset mapping of MIDI 2.0 channel voice messages.
//!
//! Depending on the instrument's [`MappingPolicy`], Control Change and Assignable Controller
//! messages are rewritten into 16-byte parameter-change SysEx8 packets, and Program Change
//! messages become preset selections handed to a [`PresetSink`].

use std::ops::BitOr;

use crate::midi2::{
    OPCODE_ASSIGNABLE_CONTROLLER, OPCODE_ASSIGNABLE_PER_NOTE_CONTROLLER, OPCODE_CONTROL_CHANGE,
    OPCODE_PROGRAM_CHANGE,
};
use crate::ump::{self, UmpIter, MESSAGE_TYPE_MIDI2_CHANNEL, MESSAGE_TYPE_SYSEX8_MDS};

/// Message classes the plugin consumes directly, so the host must not repurpose them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MappingPolicy(u32);

impl MappingPolicy {
    pub const NONE: Self = Self(0);
    pub const ACC: Self = Self(1);
    pub const CC: Self = Self(2);
    pub const SYSEX8: Self = Self(4);
    pub const PROGRAM: Self = Self(8);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Assignable controllers map to parameters only when the plugin takes ACC but not SysEx8.
    #[inline]
    fn maps_assignable_controllers(self) -> bool {
        self.contains(Self::ACC) && !self.contains(Self::SYSEX8)
    }
}

impl BitOr for MappingPolicy {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A decoded parameter-change packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterChange {
    pub group: u8,
    pub channel: u8,
    pub key: u8,
    pub extra: u8,
    pub index: u16,
    pub value: f32,
}

impl ParameterChange {
    pub fn to_words(&self) -> [u32; 4] {
        [
            ((0x50 + (self.group as u32 & 0xF)) << 24) + 0x7E,
            0x7F00_0000 + (self.channel as u32 & 0xF),
            ((self.key as u32) << 24) + ((self.extra as u32) << 16) + self.index as u32,
            self.value.to_bits(),
        ]
    }

    /// Decodes the packet, or `None` if the words are not a parameter change.
    pub fn from_words(words: [u32; 4]) -> Option<Self> {
        let group = ((words[0] >> 24) & 0xF) as u8;
        let channel = (words[1] & 0xF) as u8;
        let valid = (words[0] >> 24) == 0x50 + group as u32
            && (words[0] & 0xFF) == 0x7E
            && words[1] == 0x7F00_0000 + channel as u32;
        valid.then(|| Self {
            group,
            channel,
            key: (words[2] >> 24) as u8,
            extra: ((words[2] >> 16) & 0xFF) as u8,
            index: (words[2] & 0xFFFF) as u16,
            value: f32::from_bits(words[3]),
        })
    }

    /// Reads the packet at `offset` of a UMP sequence.
    pub fn read(bytes: &[u8], offset: usize) -> Option<Self> {
        let mut words = [0u32; 4];
        for (i, w) in words.iter_mut().enumerate() {
            *w = ump::read_word(bytes, offset + i * 4)?;
        }
        if ump::message_type(words[0]) != MESSAGE_TYPE_SYSEX8_MDS {
            return None;
        }
        Self::from_words(words)
    }
}

/// Receives preset selections derived from Program Change messages.
pub trait PresetSink {
    /// Handles a preset selection. May write a replacement UMP sequence into `dst`; returns the
    /// number of bytes written (0 when the selection was handled out of band).
    fn set_preset_index(&mut self, preset_index: i32, dst: &mut [u8]) -> usize;
}

/// Sink that drops preset selections.
impl PresetSink for () {
    fn set_preset_index(&mut self, _preset_index: i32, _dst: &mut [u8]) -> usize {
        0
    }
}

enum Mapped {
    Parameter { key: u8, index: u16, value: u32 },
    Preset(i32),
    PassThrough,
}

fn classify(words: [u32; 2], policy: MappingPolicy) -> Mapped {
    let [w0, w1] = words;
    let byte3 = ((w0 >> 8) & 0xFF) as u8;
    let byte4 = (w0 & 0xFF) as u8;
    match ump::status_nibble(w0) {
        OPCODE_CONTROL_CHANGE if policy.contains(MappingPolicy::CC) => Mapped::Parameter {
            key: 0,
            index: (byte3 & 0x7F) as u16,
            value: w1,
        },
        opcode @ (OPCODE_ASSIGNABLE_PER_NOTE_CONTROLLER | OPCODE_ASSIGNABLE_CONTROLLER) => {
            // A per-note ACC message sets the key and is then also read as an NRPN.
            let mut key = 0;
            if opcode == OPCODE_ASSIGNABLE_PER_NOTE_CONTROLLER
                && policy.maps_assignable_controllers()
            {
                key = byte3;
            }
            if policy.maps_assignable_controllers() {
                Mapped::Parameter {
                    key,
                    index: byte3 as u16 * 0x80 + byte4 as u16,
                    value: w1,
                }
            } else {
                Mapped::PassThrough
            }
        }
        OPCODE_PROGRAM_CHANGE if !policy.contains(MappingPolicy::PROGRAM) => {
            let bank = if w0 & 1 != 0 {
                ((w1 >> 8) & 0x7F) * 0x80 + (w1 & 0x7F)
            } else {
                0
            };
            let program = (w1 >> 24) & 0x7F;
            Mapped::Preset((program + bank * 0x80) as i32)
        }
        _ => Mapped::PassThrough,
    }
}

/// Runs `input` through the mapping policy, writing the result to `out`.
///
/// Returns the bytes written. Output stops at the last message that fits.
pub fn map_ump_sequence(
    input: &[u8],
    out: &mut [u8],
    policy: MappingPolicy,
    presets: &mut dyn PresetSink,
) -> usize {
    let mut written = 0;
    for message in UmpIter::new(input) {
        let w0 = message.word(0);
        let mapped = if ump::message_type(w0) == MESSAGE_TYPE_MIDI2_CHANNEL {
            classify([w0, message.word(1)], policy)
        } else {
            Mapped::PassThrough
        };

        match mapped {
            Mapped::Parameter { key, index, value } => {
                let change = ParameterChange {
                    group: ump::group(w0),
                    channel: ump::channel(w0),
                    key,
                    extra: 0,
                    index,
                    value: f32::from_bits(value),
                };
                let size = ump::write_words(out, written, &change.to_words());
                if size == 0 {
                    break;
                }
                written += size;
            }
            Mapped::Preset(preset_index) => {
                written += presets.set_preset_index(preset_index, &mut out[written..]);
            }
            Mapped::PassThrough => {
                let size = message.len();
                if written + size > out.len() {
                    break;
                }
                out[written..written + size].copy_from_slice(message.bytes);
                written += size;
            }
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi2::ChannelVoice2;
    use midi2::prelude::*;

    #[derive(Default)]
    struct RecordingSink {
        presets: Vec<i32>,
    }

    impl PresetSink for RecordingSink {
        fn set_preset_index(&mut self, preset_index: i32, _dst: &mut [u8]) -> usize {
            self.presets.push(preset_index);
            0
        }
    }

    fn cc(controller: u8, value: u32) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        ChannelVoice2::control_change(u4::new(0), u4::new(2), u7::new(controller), value)
            .write(&mut bytes, 0);
        bytes
    }

    #[test]
    fn test_parameter_packet_words() {
        let change = ParameterChange {
            group: 1,
            channel: 3,
            key: 60,
            extra: 0,
            index: 0x1234,
            value: 0.5,
        };
        let words = change.to_words();
        assert_eq!(words[0], 0x5100_007E);
        assert_eq!(words[1], 0x7F00_0003);
        assert_eq!(words[2], 0x3C00_1234);
        assert_eq!(ParameterChange::from_words(words), Some(change));

        let mut broken = words;
        broken[1] = 0x7E00_0003;
        assert_eq!(ParameterChange::from_words(broken), None);
    }

    #[test]
    fn test_cc_becomes_parameter_when_policy_allows() {
        let input = cc(74, 0x4000_0000);
        let mut out = [0u8; 32];
        let written = map_ump_sequence(&input, &mut out, MappingPolicy::CC, &mut ());
        assert_eq!(written, 16);
        let change = ParameterChange::read(&out, 0).unwrap();
        assert_eq!(change.index, 74);
        assert_eq!(change.channel, 2);
        assert_eq!(change.value.to_bits(), 0x4000_0000);
    }

    #[test]
    fn test_cc_passes_through_without_policy() {
        let input = cc(74, 0x4000_0000);
        let mut out = [0u8; 32];
        let written = map_ump_sequence(&input, &mut out, MappingPolicy::NONE, &mut ());
        assert_eq!(&out[..written], &input[..]);
    }

    #[test]
    fn test_per_note_acc_sets_key_and_nrpn_index() {
        let mut input = [0u8; 8];
        // per-note ACC: note 60, index 5
        ump::write_words(&mut input, 0, &[0x4010_3C05, 0xABCD_0000]);
        let mut out = [0u8; 32];
        let written = map_ump_sequence(&input, &mut out, MappingPolicy::ACC, &mut ());
        assert_eq!(written, 16);
        let change = ParameterChange::read(&out, 0).unwrap();
        assert_eq!(change.key, 60);
        assert_eq!(change.index, 60 * 0x80 + 5);

        // SysEx8 in the policy keeps assignable controllers untouched.
        let written = map_ump_sequence(
            &input,
            &mut out,
            MappingPolicy::ACC | MappingPolicy::SYSEX8,
            &mut (),
        );
        assert_eq!(&out[..written], &input[..]);
    }

    #[test]
    fn test_program_change_goes_to_preset_sink() {
        let mut input = [0u8; 12];
        ChannelVoice2::program_change(u4::new(0), u4::new(0), u7::new(3), Some(u14::new(1)))
            .write(&mut input, 0);
        ump::write_word(&mut input, 8, 0x2090_4064);

        let mut sink = RecordingSink::default();
        let mut out = [0u8; 32];
        let written = map_ump_sequence(&input, &mut out, MappingPolicy::NONE, &mut sink);
        assert_eq!(sink.presets, vec![3 + 128]);
        // Only the MIDI 1.0 note passes through.
        assert_eq!(written, 4);

        let mut sink = RecordingSink::default();
        let written = map_ump_sequence(&input, &mut out, MappingPolicy::PROGRAM, &mut sink);
        assert!(sink.presets.is_empty());
        assert_eq!(written, 12);
    }
}
