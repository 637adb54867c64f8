//! SysEx8 packetization.
//!
//! Packet layout (16 bytes): `[0x50|group][status|num_bytes][stream_id][data...13]`, where
//! `num_bytes` counts the stream id plus the data bytes in the packet. Packet bytes are packed
//! into words most-significant byte first.

use crate::ump::{self, MESSAGE_TYPE_SYSEX8_MDS};

pub const SYSEX8_PACKET_SIZE: usize = 16;
pub const SYSEX8_MAX_DATA_PER_PACKET: usize = 13;

pub const SYSEX8_STATUS_COMPLETE: u8 = 0x00;
pub const SYSEX8_STATUS_START: u8 = 0x10;
pub const SYSEX8_STATUS_CONTINUE: u8 = 0x20;
pub const SYSEX8_STATUS_END: u8 = 0x30;

/// Number of packets needed for `data_len` bytes. An empty payload still takes one packet.
#[inline]
pub const fn packet_count(data_len: usize) -> usize {
    if data_len == 0 {
        1
    } else {
        data_len.div_ceil(SYSEX8_MAX_DATA_PER_PACKET)
    }
}

/// Byte `index` (0..16) of the packet starting at `words`.
#[inline]
fn packet_byte(words: &[u32; 4], index: usize) -> u8 {
    (words[index / 4] >> (24 - 8 * (index % 4))) as u8
}

/// Header view of one SysEx8 packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sysex8Packet {
    words: [u32; 4],
}

impl Sysex8Packet {
    /// Reads the packet at `offset`, if a SysEx8 packet sits there.
    pub fn read(bytes: &[u8], offset: usize) -> Option<Self> {
        let mut words = [0u32; 4];
        for (i, w) in words.iter_mut().enumerate() {
            *w = ump::read_word(bytes, offset + i * 4)?;
        }
        if ump::message_type(words[0]) != MESSAGE_TYPE_SYSEX8_MDS {
            return None;
        }
        Some(Self { words })
    }

    #[inline]
    pub fn group(&self) -> u8 {
        ump::group(self.words[0])
    }

    #[inline]
    pub fn status(&self) -> u8 {
        packet_byte(&self.words, 1) & 0xF0
    }

    #[inline]
    pub fn stream_id(&self) -> u8 {
        packet_byte(&self.words, 2)
    }

    /// Data bytes carried by this packet, excluding the stream id.
    #[inline]
    pub fn data_len(&self) -> usize {
        let num_bytes = (packet_byte(&self.words, 1) & 0x0F) as usize;
        num_bytes.saturating_sub(1).min(SYSEX8_MAX_DATA_PER_PACKET)
    }

    #[inline]
    pub fn data_byte(&self, index: usize) -> u8 {
        packet_byte(&self.words, 3 + index)
    }

    /// Copies the data bytes into `dst`. Returns `false` if `dst` is too small.
    pub fn copy_data(&self, dst: &mut [u8]) -> bool {
        let len = self.data_len();
        if dst.len() < len {
            return false;
        }
        for (i, b) in dst[..len].iter_mut().enumerate() {
            *b = self.data_byte(i);
        }
        true
    }
}

/// Writes `data` as a SysEx8 packet stream into `dst`.
///
/// Returns the number of bytes written, or 0 when the whole stream does not fit (nothing is
/// written then).
pub fn forge_sysex8(group: u8, stream_id: u8, data: &[u8], dst: &mut [u8]) -> usize {
    let packets = packet_count(data.len());
    let total = packets * SYSEX8_PACKET_SIZE;
    if total > dst.len() {
        return 0;
    }

    for index in 0..packets {
        let start = index * SYSEX8_MAX_DATA_PER_PACKET;
        let end = (start + SYSEX8_MAX_DATA_PER_PACKET).min(data.len());
        let chunk = &data[start.min(end)..end];
        let status = match (packets, index) {
            (1, _) => SYSEX8_STATUS_COMPLETE,
            (_, 0) => SYSEX8_STATUS_START,
            (n, i) if i + 1 == n => SYSEX8_STATUS_END,
            _ => SYSEX8_STATUS_CONTINUE,
        };

        let mut packet = [0u8; SYSEX8_PACKET_SIZE];
        packet[0] = (MESSAGE_TYPE_SYSEX8_MDS << 4) | (group & 0xF);
        packet[1] = status | (chunk.len() as u8 + 1);
        packet[2] = stream_id;
        packet[3..3 + chunk.len()].copy_from_slice(chunk);

        let offset = index * SYSEX8_PACKET_SIZE;
        for w in 0..4 {
            let word = u32::from_be_bytes([
                packet[w * 4],
                packet[w * 4 + 1],
                packet[w * 4 + 2],
                packet[w * 4 + 3],
            ]);
            ump::write_word(dst, offset + w * 4, word);
        }
    }
    total
}

/// Outcome of [`read_sysex8`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sysex8Read {
    /// The stream was reassembled into `dst[..data_len]`; `end_offset` is the byte offset just
    /// past its final packet.
    Complete { data_len: usize, end_offset: usize },
    /// No SysEx8 packet at the given offset.
    NotSysex8,
    /// The sequence ended before the stream's final packet.
    Truncated,
    /// Reassembled data exceeds `dst`.
    Overflow,
}

/// Reassembles the SysEx8 stream whose first packet sits at `offset`.
///
/// Packets of other streams and other message types in between are skipped.
pub fn read_sysex8(src: &[u8], offset: usize, dst: &mut [u8]) -> Sysex8Read {
    let Some(first) = Sysex8Packet::read(src, offset) else {
        return Sysex8Read::NotSysex8;
    };
    let stream_id = first.stream_id();
    let mut data_len = 0usize;
    let mut pos = offset;
    let mut packet = first;

    loop {
        let len = packet.data_len();
        if data_len + len > dst.len() {
            return Sysex8Read::Overflow;
        }
        packet.copy_data(&mut dst[data_len..data_len + len]);
        data_len += len;
        pos += SYSEX8_PACKET_SIZE;

        let status = packet.status();
        if status == SYSEX8_STATUS_COMPLETE || status == SYSEX8_STATUS_END {
            return Sysex8Read::Complete {
                data_len,
                end_offset: pos,
            };
        }

        // Find the next packet of the same stream.
        loop {
            let Some(word0) = ump::read_word(src, pos) else {
                return Sysex8Read::Truncated;
            };
            let size = ump::message_size_for_type(ump::message_type(word0));
            if pos + size > src.len() {
                return Sysex8Read::Truncated;
            }
            match Sysex8Packet::read(src, pos) {
                Some(next) if next.stream_id() == stream_id => {
                    packet = next;
                    break;
                }
                _ => pos += size,
            }
        }
    }
}
