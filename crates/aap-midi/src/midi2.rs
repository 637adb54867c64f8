//! MIDI 2.0 channel voice messages.

use midi2::prelude::*;

use crate::ump::{self, MESSAGE_TYPE_MIDI2_CHANNEL};

pub const OPCODE_REGISTERED_PER_NOTE_CONTROLLER: u8 = 0x0;
pub const OPCODE_ASSIGNABLE_PER_NOTE_CONTROLLER: u8 = 0x1;
pub const OPCODE_REGISTERED_CONTROLLER: u8 = 0x2;
pub const OPCODE_ASSIGNABLE_CONTROLLER: u8 = 0x3;
pub const OPCODE_NOTE_OFF: u8 = 0x8;
pub const OPCODE_NOTE_ON: u8 = 0x9;
pub const OPCODE_KEY_PRESSURE: u8 = 0xA;
pub const OPCODE_CONTROL_CHANGE: u8 = 0xB;
pub const OPCODE_PROGRAM_CHANGE: u8 = 0xC;
pub const OPCODE_CHANNEL_PRESSURE: u8 = 0xD;
pub const OPCODE_PITCH_BEND: u8 = 0xE;

#[inline]
fn first_two(data: &[u32]) -> [u32; 2] {
    [data[0], data[1]]
}

/// A 64-bit MIDI 2.0 channel voice message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelVoice2 {
    pub words: [u32; 2],
}

impl ChannelVoice2 {
    pub fn note_on(group: u4, channel: u4, note: u7, velocity: u16) -> Self {
        let mut msg = midi2::channel_voice2::NoteOn::<[u32; 2]>::new();
        msg.set_group(group);
        msg.set_channel(channel);
        msg.set_note_number(note);
        msg.set_velocity(velocity);
        Self {
            words: first_two(msg.data()),
        }
    }

    pub fn note_off(group: u4, channel: u4, note: u7, velocity: u16) -> Self {
        let mut msg = midi2::channel_voice2::NoteOff::<[u32; 2]>::new();
        msg.set_group(group);
        msg.set_channel(channel);
        msg.set_note_number(note);
        msg.set_velocity(velocity);
        Self {
            words: first_two(msg.data()),
        }
    }

    pub fn key_pressure(group: u4, channel: u4, note: u7, pressure: u32) -> Self {
        let mut msg = midi2::channel_voice2::KeyPressure::<[u32; 2]>::new();
        msg.set_group(group);
        msg.set_channel(channel);
        msg.set_note_number(note);
        msg.set_key_pressure_data(pressure);
        Self {
            words: first_two(msg.data()),
        }
    }

    pub fn control_change(group: u4, channel: u4, controller: u7, value: u32) -> Self {
        let mut msg = midi2::channel_voice2::ControlChange::<[u32; 2]>::new();
        msg.set_group(group);
        msg.set_channel(channel);
        msg.set_control(controller);
        msg.set_control_change_data(value);
        Self {
            words: first_two(msg.data()),
        }
    }

    pub fn program_change(group: u4, channel: u4, program: u7, bank: Option<u14>) -> Self {
        let mut msg = midi2::channel_voice2::ProgramChange::<[u32; 2]>::new();
        msg.set_group(group);
        msg.set_channel(channel);
        msg.set_program(program);
        msg.set_bank(bank);
        Self {
            words: first_two(msg.data()),
        }
    }

    pub fn channel_pressure(group: u4, channel: u4, pressure: u32) -> Self {
        let mut msg = midi2::channel_voice2::ChannelPressure::<[u32; 2]>::new();
        msg.set_group(group);
        msg.set_channel(channel);
        msg.set_channel_pressure_data(pressure);
        Self {
            words: first_two(msg.data()),
        }
    }

    pub fn pitch_bend(group: u4, channel: u4, bend: u32) -> Self {
        let mut msg = midi2::channel_voice2::ChannelPitchBend::<[u32; 2]>::new();
        msg.set_group(group);
        msg.set_channel(channel);
        msg.set_pitch_bend_data(bend);
        Self {
            words: first_two(msg.data()),
        }
    }

    /// RPN (`registered == true`) or NRPN with a 7-bit bank and index.
    pub fn controller(
        group: u8,
        channel: u8,
        registered: bool,
        bank: u8,
        index: u8,
        value: u32,
    ) -> Self {
        let opcode = if registered {
            OPCODE_REGISTERED_CONTROLLER
        } else {
            OPCODE_ASSIGNABLE_CONTROLLER
        };
        Self::from_parts(group, opcode, channel, bank & 0x7F, index & 0x7F, value)
    }

    fn from_parts(group: u8, opcode: u8, channel: u8, byte3: u8, byte4: u8, data: u32) -> Self {
        let word0 = ((MESSAGE_TYPE_MIDI2_CHANNEL as u32) << 28)
            | ((group as u32 & 0xF) << 24)
            | ((opcode as u32 & 0xF) << 20)
            | ((channel as u32 & 0xF) << 16)
            | ((byte3 as u32) << 8)
            | byte4 as u32;
        Self {
            words: [word0, data],
        }
    }

    /// Wraps two words if they hold a MIDI 2.0 channel voice message.
    pub fn from_words(words: &[u32]) -> Option<Self> {
        if words.len() < 2 || ump::message_type(words[0]) != MESSAGE_TYPE_MIDI2_CHANNEL {
            return None;
        }
        Some(Self {
            words: [words[0], words[1]],
        })
    }

    #[inline]
    pub fn group(&self) -> u8 {
        ump::group(self.words[0])
    }

    #[inline]
    pub fn channel(&self) -> u8 {
        ump::channel(self.words[0])
    }

    #[inline]
    pub fn opcode(&self) -> u8 {
        ump::status_nibble(self.words[0])
    }

    /// Writes both words at `offset`. Returns 8, or 0 if they do not fit.
    pub fn write(&self, dst: &mut [u8], offset: usize) -> usize {
        ump::write_words(dst, offset, &self.words)
    }

    pub fn kind(&self) -> ChannelVoice2Kind {
        let [w0, w1] = self.words;
        let byte3 = ((w0 >> 8) & 0x7F) as u8;
        let byte4 = (w0 & 0xFF) as u8;
        match self.opcode() {
            OPCODE_NOTE_ON => ChannelVoice2Kind::NoteOn {
                note: byte3,
                velocity: (w1 >> 16) as u16,
            },
            OPCODE_NOTE_OFF => ChannelVoice2Kind::NoteOff {
                note: byte3,
                velocity: (w1 >> 16) as u16,
            },
            OPCODE_KEY_PRESSURE => ChannelVoice2Kind::KeyPressure {
                note: byte3,
                pressure: w1,
            },
            OPCODE_CONTROL_CHANGE => ChannelVoice2Kind::ControlChange {
                controller: byte3,
                value: w1,
            },
            OPCODE_PROGRAM_CHANGE => {
                let bank = (w0 & 1 != 0)
                    .then(|| ((((w1 >> 8) & 0x7F) as u16) << 7) | (w1 & 0x7F) as u16);
                ChannelVoice2Kind::ProgramChange {
                    program: ((w1 >> 24) & 0x7F) as u8,
                    bank,
                }
            }
            OPCODE_CHANNEL_PRESSURE => ChannelVoice2Kind::ChannelPressure { pressure: w1 },
            OPCODE_PITCH_BEND => ChannelVoice2Kind::PitchBend { bend: w1 },
            OPCODE_REGISTERED_CONTROLLER => ChannelVoice2Kind::RegisteredController {
                bank: byte3,
                index: byte4 & 0x7F,
                value: w1,
            },
            OPCODE_ASSIGNABLE_CONTROLLER => ChannelVoice2Kind::AssignableController {
                bank: byte3,
                index: byte4 & 0x7F,
                value: w1,
            },
            OPCODE_REGISTERED_PER_NOTE_CONTROLLER | OPCODE_ASSIGNABLE_PER_NOTE_CONTROLLER => {
                ChannelVoice2Kind::PerNoteController {
                    registered: self.opcode() == OPCODE_REGISTERED_PER_NOTE_CONTROLLER,
                    note: byte3,
                    index: byte4,
                    value: w1,
                }
            }
            opcode => ChannelVoice2Kind::Other { opcode },
        }
    }
}

/// Decoded MIDI 2.0 channel voice message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelVoice2Kind {
    NoteOn { note: u8, velocity: u16 },
    NoteOff { note: u8, velocity: u16 },
    KeyPressure { note: u8, pressure: u32 },
    ControlChange { controller: u8, value: u32 },
    /// `bank` is `MSB << 7 | LSB` when the bank-valid flag is set.
    ProgramChange { program: u8, bank: Option<u16> },
    ChannelPressure { pressure: u32 },
    PitchBend { bend: u32 },
    RegisteredController { bank: u8, index: u8, value: u32 },
    AssignableController { bank: u8, index: u8, value: u32 },
    PerNoteController {
        registered: bool,
        note: u8,
        index: u8,
        value: u32,
    },
    Other { opcode: u8 },
}

/// Min-center-max upscaling from `src_bits` to `dst_bits` (at most 32).
///
/// Zero, the center value and the maximum map onto their counterparts exactly.
pub fn scale_up(value: u32, src_bits: u32, dst_bits: u32) -> u32 {
    debug_assert!(src_bits > 1 && src_bits < dst_bits && dst_bits <= 32);
    let value = value as u64 & ((1u64 << src_bits) - 1);
    let scale_bits = dst_bits - src_bits;
    let mut shifted = value << scale_bits;
    let center = 1u64 << (src_bits - 1);
    if value <= center {
        return shifted as u32;
    }
    let repeat_bits = src_bits - 1;
    let mut repeat = value & ((1u64 << repeat_bits) - 1);
    if scale_bits > repeat_bits {
        repeat <<= scale_bits - repeat_bits;
    } else {
        repeat >>= repeat_bits - scale_bits;
    }
    while repeat != 0 {
        shifted |= repeat;
        repeat >>= repeat_bits;
    }
    shifted as u32
}

#[inline]
pub fn midi1_velocity_to_midi2(v: u8) -> u16 {
    scale_up(v as u32, 7, 16) as u16
}

#[inline]
pub fn midi1_value_to_midi2(v: u8) -> u32 {
    scale_up(v as u32, 7, 32)
}

#[inline]
pub fn midi1_14bit_to_midi2(v: u16) -> u32 {
    scale_up(v as u32, 14, 32)
}
