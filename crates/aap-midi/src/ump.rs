//! Universal MIDI Packet primitives.
//!
//! UMP sequences are stored as 32-bit words in little-endian byte order. Every helper here
//! works on byte slices so callers can point them straight at shared-memory port buffers.

pub const MESSAGE_TYPE_UTILITY: u8 = 0x0;
pub const MESSAGE_TYPE_SYSTEM: u8 = 0x1;
pub const MESSAGE_TYPE_MIDI1_CHANNEL: u8 = 0x2;
pub const MESSAGE_TYPE_SYSEX7: u8 = 0x3;
pub const MESSAGE_TYPE_MIDI2_CHANNEL: u8 = 0x4;
pub const MESSAGE_TYPE_SYSEX8_MDS: u8 = 0x5;
pub const MESSAGE_TYPE_UMP_STREAM: u8 = 0xF;

pub const UTILITY_STATUS_JR_TIMESTAMP: u8 = 0x2;
pub const UTILITY_STATUS_DELTA_CLOCKSTAMP: u8 = 0x4;

/// Jitter-reduction clock rate.
pub const JR_TICKS_PER_SECOND: u32 = 31250;

/// Largest tick count a single JR timestamp can carry.
pub const JR_TIMESTAMP_MAX_TICKS: u32 = 0xFFFF;

/// Message size in bytes for a UMP message type nibble.
#[inline]
pub const fn message_size_for_type(message_type: u8) -> usize {
    match message_type & 0xF {
        0x0 | 0x1 | 0x2 | 0x6 | 0x7 => 4,
        0x3 | 0x4 | 0x8 | 0x9 | 0xA => 8,
        0xB | 0xC => 12,
        _ => 16,
    }
}

#[inline]
pub const fn message_type(word0: u32) -> u8 {
    (word0 >> 28) as u8
}

#[inline]
pub const fn group(word0: u32) -> u8 {
    ((word0 >> 24) & 0xF) as u8
}

/// Status nibble (bits 20-23), meaningful for channel voice and utility messages.
#[inline]
pub const fn status_nibble(word0: u32) -> u8 {
    ((word0 >> 20) & 0xF) as u8
}

#[inline]
pub const fn channel(word0: u32) -> u8 {
    ((word0 >> 16) & 0xF) as u8
}

/// Reads the word at `offset`, or `None` past the end.
#[inline]
pub fn read_word(bytes: &[u8], offset: usize) -> Option<u32> {
    let chunk = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

/// Writes `word` at `offset`. Returns `false` when it does not fit.
#[inline]
pub fn write_word(bytes: &mut [u8], offset: usize, word: u32) -> bool {
    match bytes.get_mut(offset..offset + 4) {
        Some(chunk) => {
            chunk.copy_from_slice(&word.to_le_bytes());
            true
        }
        None => false,
    }
}

/// Writes consecutive words starting at `offset`. Returns the number of bytes written, or 0
/// when the words do not fit.
#[inline]
pub fn write_words(bytes: &mut [u8], offset: usize, words: &[u32]) -> usize {
    let len = words.len() * 4;
    if offset + len > bytes.len() {
        return 0;
    }
    for (i, word) in words.iter().enumerate() {
        write_word(bytes, offset + i * 4, *word);
    }
    len
}

/// JR timestamp utility message.
#[inline]
pub const fn jr_timestamp(group: u8, ticks: u16) -> u32 {
    ((group as u32 & 0xF) << 24) | ((UTILITY_STATUS_JR_TIMESTAMP as u32) << 20) | ticks as u32
}

/// Number of ticks carried by a timing utility message, if `word0` is one.
#[inline]
pub const fn timestamp_ticks(word0: u32) -> Option<u32> {
    if message_type(word0) != MESSAGE_TYPE_UTILITY {
        return None;
    }
    match status_nibble(word0) {
        UTILITY_STATUS_JR_TIMESTAMP => Some(word0 & 0xFFFF),
        UTILITY_STATUS_DELTA_CLOCKSTAMP => Some(word0 & 0xF_FFFF),
        _ => None,
    }
}

/// Bytes needed to express a `ticks` delta as JR timestamps.
#[inline]
pub const fn timestamp_cost(ticks: u32) -> usize {
    (ticks.div_ceil(JR_TIMESTAMP_MAX_TICKS) as usize) * 4
}

/// Writes `ticks` as a run of JR timestamps. Returns the bytes written, or 0 if they do not
/// fit (nothing is written in that case).
pub fn write_timestamps(bytes: &mut [u8], offset: usize, group: u8, ticks: u32) -> usize {
    let cost = timestamp_cost(ticks);
    if offset + cost > bytes.len() {
        return 0;
    }
    let mut remaining = ticks;
    let mut pos = offset;
    while remaining > 0 {
        let chunk = remaining.min(JR_TIMESTAMP_MAX_TICKS);
        write_word(bytes, pos, jr_timestamp(group, chunk as u16));
        remaining -= chunk;
        pos += 4;
    }
    cost
}

/// One message inside a UMP sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UmpRef<'a> {
    pub offset: usize,
    pub bytes: &'a [u8],
}

impl<'a> UmpRef<'a> {
    #[inline]
    pub fn word(&self, index: usize) -> u32 {
        read_word(self.bytes, index * 4).unwrap_or(0)
    }

    #[inline]
    pub fn message_type(&self) -> u8 {
        message_type(self.word(0))
    }

    #[inline]
    pub fn group(&self) -> u8 {
        group(self.word(0))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Iterates whole messages in a UMP sequence. A trailing partial message ends iteration.
#[derive(Debug, Clone)]
pub struct UmpIter<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> UmpIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Byte offset of the next message.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for UmpIter<'a> {
    type Item = UmpRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let word0 = read_word(self.data, self.offset)?;
        let size = message_size_for_type(message_type(word0));
        let bytes = self.data.get(self.offset..self.offset + size)?;
        let item = UmpRef {
            offset: self.offset,
            bytes,
        };
        self.offset += size;
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_sizes() {
        assert_eq!(message_size_for_type(0x0), 4);
        assert_eq!(message_size_for_type(0x2), 4);
        assert_eq!(message_size_for_type(0x3), 8);
        assert_eq!(message_size_for_type(0x4), 8);
        assert_eq!(message_size_for_type(0xB), 12);
        assert_eq!(message_size_for_type(0x5), 16);
        assert_eq!(message_size_for_type(0xF), 16);
    }

    #[test]
    fn test_iterates_mixed_sizes() {
        let mut buf = [0u8; 32];
        write_word(&mut buf, 0, 0x2090_4064); // MIDI1 note on
        write_words(&mut buf, 4, &[0x4090_4000, 0xFFFF_0000]); // MIDI2 note on
        write_words(&mut buf, 12, &[0x5001_0000, 0, 0, 0]); // SysEx8
        let sizes: Vec<usize> = UmpIter::new(&buf[..28]).map(|u| u.len()).collect();
        assert_eq!(sizes, vec![4, 8, 16]);
    }

    #[test]
    fn test_trailing_partial_message_is_ignored() {
        let mut buf = [0u8; 12];
        write_word(&mut buf, 0, 0x2090_4064);
        write_word(&mut buf, 4, 0x4090_4000);
        let count = UmpIter::new(&buf[..8]).count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_timestamps() {
        assert_eq!(jr_timestamp(0, 100), 0x0020_0064);
        assert_eq!(timestamp_ticks(0x0020_0064), Some(100));
        assert_eq!(timestamp_ticks(0x0040_1234), Some(0x1234));
        assert_eq!(timestamp_ticks(0x2090_4064), None);
        assert_eq!(timestamp_cost(0), 0);
        assert_eq!(timestamp_cost(0xFFFF), 4);
        assert_eq!(timestamp_cost(0x10000), 8);
    }

    #[test]
    fn test_write_timestamps_splits_long_gaps() {
        let mut buf = [0u8; 16];
        let written = write_timestamps(&mut buf, 0, 0, 0x1_0001);
        assert_eq!(written, 8);
        assert_eq!(read_word(&buf, 0), Some(0x0020_FFFF));
        assert_eq!(read_word(&buf, 4), Some(0x0020_0002));

        // Nothing is written when the run does not fit.
        let mut small = [0u8; 4];
        assert_eq!(write_timestamps(&mut small, 0, 0, 0x1_0001), 0);
        assert_eq!(small, [0u8; 4]);
    }
}
