//! MIDI 1.0 byte stream to UMP conversion.
//!
//! Channel messages come out as MIDI 2.0 channel voice messages. SysEx becomes SysEx7 packets
//! and system messages become type 1 packets.

use midi2::prelude::*;

use crate::midi2::{
    midi1_14bit_to_midi2, midi1_value_to_midi2, midi1_velocity_to_midi2, ChannelVoice2,
};
use crate::ump::{self, MESSAGE_TYPE_SYSEX7, MESSAGE_TYPE_SYSTEM};
use crate::{Error, Result};

const CC_BANK_SELECT_MSB: u8 = 0;
const CC_DATA_ENTRY_MSB: u8 = 6;
const CC_BANK_SELECT_LSB: u8 = 32;
const CC_DATA_ENTRY_LSB: u8 = 38;
const CC_NRPN_LSB: u8 = 98;
const CC_NRPN_MSB: u8 = 99;
const CC_RPN_LSB: u8 = 100;
const CC_RPN_MSB: u8 = 101;

const SYSEX7_MAX_DATA_PER_PACKET: usize = 6;

#[derive(Debug, Clone, Copy, Default)]
struct ControllerState {
    /// `true` for RPN, `false` for NRPN; `None` until a selection arrives.
    registered: Option<bool>,
    param_msb: u8,
    param_lsb: u8,
    /// Data entry MSB still waiting for its LSB.
    pending_msb: Option<u8>,
    bank_msb: Option<u8>,
    bank_lsb: Option<u8>,
}

/// Stateful MIDI 1.0 to UMP converter.
///
/// Controller selection and bank select persist across calls, so one converter should be kept
/// per input stream.
#[derive(Debug, Default)]
pub struct Midi1ToUmpConverter {
    channels: [ControllerState; 16],
}

struct Writer<'a> {
    dst: &'a mut [u8],
    len: usize,
}

impl Writer<'_> {
    fn words(&mut self, words: &[u32]) -> Result<()> {
        let written = ump::write_words(self.dst, self.len, words);
        if written == 0 {
            return Err(Error::OutputFull {
                capacity: self.dst.len(),
            });
        }
        self.len += written;
        Ok(())
    }

    fn voice(&mut self, msg: ChannelVoice2) -> Result<()> {
        self.words(&msg.words)
    }
}

#[inline]
fn data_len(status: u8) -> usize {
    match status & 0xF0 {
        0xC0 | 0xD0 => 1,
        _ => 2,
    }
}

impl Midi1ToUmpConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops controller selections and remembered banks.
    pub fn reset(&mut self) {
        self.channels = Default::default();
    }

    /// Converts `midi1` into UMPs on `group`, writing to `dst`. Returns the bytes written.
    pub fn convert(&mut self, midi1: &[u8], group: u8, dst: &mut [u8]) -> Result<usize> {
        let mut out = Writer { dst, len: 0 };
        let mut running_status: Option<u8> = None;
        let mut pos = 0;

        while pos < midi1.len() {
            let byte = midi1[pos];

            if byte >= 0xF8 {
                // Realtime messages leave running status untouched.
                out.words(&[system_word(group, byte, 0, 0)])?;
                pos += 1;
                continue;
            }

            if byte == 0xF0 {
                pos = self.convert_sysex(midi1, pos, group, &mut out)?;
                running_status = None;
                continue;
            }

            if byte >= 0xF0 {
                let needed = match byte {
                    0xF1 | 0xF3 => 1,
                    0xF2 => 2,
                    _ => 0,
                };
                let data = midi1
                    .get(pos + 1..pos + 1 + needed)
                    .ok_or(Error::Truncated(pos))?;
                let d1 = data.first().copied().unwrap_or(0);
                let d2 = data.get(1).copied().unwrap_or(0);
                out.words(&[system_word(group, byte, d1, d2)])?;
                running_status = None;
                pos += 1 + needed;
                continue;
            }

            let (status, data_start) = if byte >= 0x80 {
                running_status = Some(byte);
                (byte, pos + 1)
            } else {
                match running_status {
                    Some(status) => (status, pos),
                    None => return Err(Error::MissingStatus { offset: pos, byte }),
                }
            };

            let needed = data_len(status);
            let data = midi1
                .get(data_start..data_start + needed)
                .ok_or(Error::Truncated(pos))?;
            self.convert_channel_message(status, data, group, &mut out)?;
            pos = data_start + needed;
        }

        self.flush_pending(group, &mut out)?;
        Ok(out.len)
    }

    fn convert_channel_message(
        &mut self,
        status: u8,
        data: &[u8],
        group: u8,
        out: &mut Writer<'_>,
    ) -> Result<()> {
        let channel = status & 0x0F;
        let g = u4::new(group & 0xF);
        let ch = u4::new(channel);
        let d1 = data[0] & 0x7F;
        let d2 = data.get(1).copied().unwrap_or(0) & 0x7F;

        match status & 0xF0 {
            0x80 => out.voice(ChannelVoice2::note_off(
                g,
                ch,
                u7::new(d1),
                midi1_velocity_to_midi2(d2),
            )),
            0x90 if d2 == 0 => out.voice(ChannelVoice2::note_off(g, ch, u7::new(d1), 0)),
            0x90 => out.voice(ChannelVoice2::note_on(
                g,
                ch,
                u7::new(d1),
                midi1_velocity_to_midi2(d2),
            )),
            0xA0 => out.voice(ChannelVoice2::key_pressure(
                g,
                ch,
                u7::new(d1),
                midi1_value_to_midi2(d2),
            )),
            0xB0 => self.convert_control_change(group, channel, d1, d2, out),
            0xC0 => {
                let state = &self.channels[channel as usize];
                let bank = match (state.bank_msb, state.bank_lsb) {
                    (None, None) => None,
                    (msb, lsb) => Some(u14::new(
                        ((msb.unwrap_or(0) as u16) << 7) | lsb.unwrap_or(0) as u16,
                    )),
                };
                out.voice(ChannelVoice2::program_change(g, ch, u7::new(d1), bank))
            }
            0xD0 => out.voice(ChannelVoice2::channel_pressure(
                g,
                ch,
                midi1_value_to_midi2(d1),
            )),
            _ => {
                let bend = (d1 as u16) | ((d2 as u16) << 7);
                out.voice(ChannelVoice2::pitch_bend(g, ch, midi1_14bit_to_midi2(bend)))
            }
        }
    }

    fn convert_control_change(
        &mut self,
        group: u8,
        channel: u8,
        index: u8,
        value: u8,
        out: &mut Writer<'_>,
    ) -> Result<()> {
        match index {
            CC_RPN_MSB | CC_RPN_LSB | CC_NRPN_MSB | CC_NRPN_LSB => {
                self.flush_channel(group, channel, out)?;
                let state = &mut self.channels[channel as usize];
                let registered = matches!(index, CC_RPN_MSB | CC_RPN_LSB);
                if state.registered != Some(registered) {
                    state.param_msb = 0;
                    state.param_lsb = 0;
                }
                state.registered = Some(registered);
                if matches!(index, CC_RPN_MSB | CC_NRPN_MSB) {
                    state.param_msb = value;
                } else {
                    state.param_lsb = value;
                }
                Ok(())
            }
            CC_DATA_ENTRY_MSB if self.channels[channel as usize].registered.is_some() => {
                self.flush_channel(group, channel, out)?;
                self.channels[channel as usize].pending_msb = Some(value);
                Ok(())
            }
            CC_DATA_ENTRY_LSB if self.channels[channel as usize].registered.is_some() => {
                let state = &mut self.channels[channel as usize];
                let msb = state.pending_msb.take().unwrap_or(0);
                self.emit_controller(group, channel, msb, value, out)
            }
            CC_BANK_SELECT_MSB => {
                self.channels[channel as usize].bank_msb = Some(value);
                Ok(())
            }
            CC_BANK_SELECT_LSB => {
                self.channels[channel as usize].bank_lsb = Some(value);
                Ok(())
            }
            _ => out.voice(ChannelVoice2::control_change(
                u4::new(group & 0xF),
                u4::new(channel),
                u7::new(index),
                midi1_value_to_midi2(value),
            )),
        }
    }

    fn emit_controller(
        &self,
        group: u8,
        channel: u8,
        msb: u8,
        lsb: u8,
        out: &mut Writer<'_>,
    ) -> Result<()> {
        let state = &self.channels[channel as usize];
        let value = ((msb as u16) << 7) | lsb as u16;
        out.voice(ChannelVoice2::controller(
            group,
            channel,
            state.registered.unwrap_or(false),
            state.param_msb,
            state.param_lsb,
            midi1_14bit_to_midi2(value),
        ))
    }

    /// Emits a data entry MSB that never got its LSB.
    fn flush_channel(&mut self, group: u8, channel: u8, out: &mut Writer<'_>) -> Result<()> {
        match self.channels[channel as usize].pending_msb.take() {
            Some(msb) => self.emit_controller(group, channel, msb, 0, out),
            None => Ok(()),
        }
    }

    fn flush_pending(&mut self, group: u8, out: &mut Writer<'_>) -> Result<()> {
        for channel in 0..16 {
            self.flush_channel(group, channel, out)?;
        }
        Ok(())
    }

    /// Converts `F0 ... F7` starting at `start`. Returns the position after `F7`.
    fn convert_sysex(
        &mut self,
        midi1: &[u8],
        start: usize,
        group: u8,
        out: &mut Writer<'_>,
    ) -> Result<usize> {
        let body_start = start + 1;
        let end = midi1[body_start..]
            .iter()
            .position(|b| *b == 0xF7)
            .map(|p| body_start + p)
            .ok_or(Error::UnterminatedSysex(start))?;
        let body = &midi1[body_start..end];

        let packets = if body.is_empty() {
            1
        } else {
            body.len().div_ceil(SYSEX7_MAX_DATA_PER_PACKET)
        };
        for index in 0..packets {
            let from = index * SYSEX7_MAX_DATA_PER_PACKET;
            let to = (from + SYSEX7_MAX_DATA_PER_PACKET).min(body.len());
            let chunk = &body[from.min(to)..to];
            let status: u8 = match (packets, index) {
                (1, _) => 0x00,
                (_, 0) => 0x10,
                (n, i) if i + 1 == n => 0x30,
                _ => 0x20,
            };
            let mut bytes = [0u8; 8];
            bytes[0] = (MESSAGE_TYPE_SYSEX7 << 4) | (group & 0xF);
            bytes[1] = status | chunk.len() as u8;
            bytes[2..2 + chunk.len()].copy_from_slice(chunk);
            out.words(&[
                u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
                u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            ])?;
        }
        Ok(end + 1)
    }
}

#[inline]
fn system_word(group: u8, status: u8, d1: u8, d2: u8) -> u32 {
    ((MESSAGE_TYPE_SYSTEM as u32) << 28)
        | ((group as u32 & 0xF) << 24)
        | ((status as u32) << 16)
        | ((d1 as u32 & 0x7F) << 8)
        | (d2 as u32 & 0x7F)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi2::ChannelVoice2Kind;

    fn convert(midi1: &[u8]) -> Vec<u32> {
        let mut converter = Midi1ToUmpConverter::new();
        let mut dst = [0u8; 256];
        let len = converter.convert(midi1, 0, &mut dst).unwrap();
        (0..len / 4)
            .map(|i| ump::read_word(&dst, i * 4).unwrap())
            .collect()
    }

    fn kind(words: &[u32]) -> ChannelVoice2Kind {
        ChannelVoice2::from_words(words).unwrap().kind()
    }

    #[test]
    fn test_note_on_with_running_status() {
        let words = convert(&[0x91, 60, 127, 62, 0]);
        assert_eq!(words.len(), 4);
        assert_eq!(
            kind(&words[0..2]),
            ChannelVoice2Kind::NoteOn {
                note: 60,
                velocity: 0xFFFF
            }
        );
        // Velocity 0 note-on is a note-off.
        assert_eq!(
            kind(&words[2..4]),
            ChannelVoice2Kind::NoteOff {
                note: 62,
                velocity: 0
            }
        );
        assert_eq!(ump::channel(words[0]), 1);
    }

    #[test]
    fn test_nrpn_sequence() {
        let words = convert(&[0xB0, 99, 2, 0xB0, 98, 9, 0xB0, 6, 64, 0xB0, 38, 0]);
        assert_eq!(words.len(), 2);
        assert_eq!(
            kind(&words),
            ChannelVoice2Kind::AssignableController {
                bank: 2,
                index: 9,
                value: 0x8000_0000
            }
        );
    }

    #[test]
    fn test_rpn_msb_without_lsb_is_flushed() {
        let words = convert(&[0xB0, 101, 0, 0xB0, 100, 0, 0xB0, 6, 2]);
        assert_eq!(words.len(), 2);
        match kind(&words) {
            ChannelVoice2Kind::RegisteredController { bank, index, .. } => {
                assert_eq!((bank, index), (0, 0));
            }
            other => panic!("Expected RegisteredController, got {:?}", other),
        }
    }

    #[test]
    fn test_bank_select_attaches_to_program_change() {
        let words = convert(&[0xB0, 0, 1, 0xB0, 32, 2, 0xC0, 5]);
        assert_eq!(words.len(), 2);
        assert_eq!(
            kind(&words),
            ChannelVoice2Kind::ProgramChange {
                program: 5,
                bank: Some((1 << 7) | 2)
            }
        );
    }

    #[test]
    fn test_plain_cc() {
        let words = convert(&[0xB3, 7, 127]);
        assert_eq!(
            kind(&words),
            ChannelVoice2Kind::ControlChange {
                controller: 7,
                value: 0xFFFF_FFFF
            }
        );
    }

    #[test]
    fn test_sysex_and_system_messages() {
        let words = convert(&[0xF8, 0xF0, 1, 2, 3, 4, 5, 6, 7, 0xF7, 0xF2, 0x10, 0x20]);
        // clock, two SysEx7 packets, song position
        assert_eq!(words.len(), 1 + 4 + 1);
        assert_eq!(words[0], 0x10F8_0000);
        assert_eq!(words[1] >> 16, 0x3016);
        assert_eq!(words[3] >> 16, 0x3031);
        assert_eq!(words[5], 0x10F2_1020);
    }

    #[test]
    fn test_malformed_input() {
        let mut converter = Midi1ToUmpConverter::new();
        let mut dst = [0u8; 64];
        assert_eq!(
            converter.convert(&[0x40, 0x40], 0, &mut dst),
            Err(Error::MissingStatus {
                offset: 0,
                byte: 0x40
            })
        );
        assert_eq!(
            converter.convert(&[0x90, 60], 0, &mut dst),
            Err(Error::Truncated(0))
        );
        assert_eq!(
            converter.convert(&[0xF0, 1, 2], 0, &mut dst),
            Err(Error::UnterminatedSysex(0))
        );
        let mut tiny = [0u8; 4];
        assert!(matches!(
            converter.convert(&[0x90, 60, 100], 0, &mut tiny),
            Err(Error::OutputFull { .. })
        ));
    }
}
