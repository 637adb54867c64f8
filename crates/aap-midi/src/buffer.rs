//! MIDI port buffer layout: a 32-byte header followed by a UMP sequence.

use crate::ump;

pub const MIDI_BUFFER_HEADER_SIZE: usize = 32;

/// Header at the start of every MIDI port buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct MidiBufferHeader {
    /// 0 means JR-timestamp ticks.
    pub time_options: i32,
    /// Length of the UMP sequence in bytes.
    pub length: u32,
    pub reserved: [u32; 6],
}

impl MidiBufferHeader {
    pub fn read(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < MIDI_BUFFER_HEADER_SIZE {
            return None;
        }
        let mut reserved = [0u32; 6];
        for (i, r) in reserved.iter_mut().enumerate() {
            *r = ump::read_word(bytes, 8 + i * 4)?;
        }
        Some(Self {
            time_options: ump::read_word(bytes, 0)? as i32,
            length: ump::read_word(bytes, 4)?,
            reserved,
        })
    }

    pub fn write(&self, bytes: &mut [u8]) -> bool {
        if bytes.len() < MIDI_BUFFER_HEADER_SIZE {
            return false;
        }
        ump::write_word(bytes, 0, self.time_options as u32);
        ump::write_word(bytes, 4, self.length);
        for (i, r) in self.reserved.iter().enumerate() {
            ump::write_word(bytes, 8 + i * 4, *r);
        }
        true
    }
}

/// Read-only view over a MIDI port buffer.
#[derive(Debug, Clone, Copy)]
pub struct MidiBufferView<'a> {
    bytes: &'a [u8],
}

impl<'a> MidiBufferView<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn header(&self) -> MidiBufferHeader {
        MidiBufferHeader::read(self.bytes).unwrap_or_default()
    }

    /// UMP sequence, clamped to the buffer when the header overstates its length.
    pub fn ump(&self) -> &'a [u8] {
        let body = self.bytes.get(MIDI_BUFFER_HEADER_SIZE..).unwrap_or(&[]);
        let len = (self.header().length as usize).min(body.len());
        &body[..len]
    }
}

/// Mutable view over a MIDI port buffer.
#[derive(Debug)]
pub struct MidiBufferViewMut<'a> {
    bytes: &'a mut [u8],
}

impl<'a> MidiBufferViewMut<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    pub fn header(&self) -> MidiBufferHeader {
        MidiBufferHeader::read(self.bytes).unwrap_or_default()
    }

    pub fn set_header(&mut self, header: MidiBufferHeader) {
        header.write(self.bytes);
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len().saturating_sub(MIDI_BUFFER_HEADER_SIZE)
    }

    pub fn len(&self) -> usize {
        (self.header().length as usize).min(self.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_len(&mut self, length: usize) {
        let length = length.min(self.capacity()) as u32;
        ump::write_word(self.bytes, 4, length);
    }

    /// Empties the sequence and resets the time options.
    pub fn clear(&mut self) {
        ump::write_word(self.bytes, 0, 0);
        self.set_len(0);
    }

    pub fn ump(&self) -> &[u8] {
        let len = self.len();
        &self.bytes[MIDI_BUFFER_HEADER_SIZE..MIDI_BUFFER_HEADER_SIZE + len]
    }

    /// Whole body area, regardless of the current length.
    pub fn body_mut(&mut self) -> &mut [u8] {
        self.bytes.get_mut(MIDI_BUFFER_HEADER_SIZE..).unwrap_or(&mut [])
    }

    /// Replaces the sequence with `ump`. Returns `false` (leaving the buffer untouched) when it
    /// does not fit.
    pub fn replace(&mut self, ump: &[u8]) -> bool {
        if ump.len() > self.capacity() {
            return false;
        }
        self.body_mut()[..ump.len()].copy_from_slice(ump);
        self.set_len(ump.len());
        true
    }

    /// Appends `ump` to the sequence. Returns `false` when it does not fit.
    pub fn append(&mut self, ump: &[u8]) -> bool {
        let len = self.len();
        if len + ump.len() > self.capacity() {
            return false;
        }
        self.body_mut()[len..len + ump.len()].copy_from_slice(ump);
        self.set_len(len + ump.len());
        true
    }
}
