//! Error types for UMP translation.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("MIDI 1.0 data byte {byte:#04x} at offset {offset} has no running status")]
    MissingStatus { offset: usize, byte: u8 },

    #[error("Truncated MIDI 1.0 message at offset {0}")]
    Truncated(usize),

    #[error("Unterminated SysEx starting at offset {0}")]
    UnterminatedSysex(usize),

    #[error("UMP output buffer full ({capacity} bytes)")]
    OutputFull { capacity: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
