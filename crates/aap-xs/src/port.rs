//! Port descriptions used for buffer negotiation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    Audio,
    Midi2,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub name: String,
    pub content_type: ContentType,
    pub direction: PortDirection,
    /// Declared minimum buffer size for non-audio ports; 0 means "use the default".
    pub minimum_size_in_bytes: usize,
}

impl PortInfo {
    pub fn audio(name: impl Into<String>, direction: PortDirection) -> Self {
        Self {
            name: name.into(),
            content_type: ContentType::Audio,
            direction,
            minimum_size_in_bytes: 0,
        }
    }

    pub fn midi2(name: impl Into<String>, direction: PortDirection) -> Self {
        Self {
            name: name.into(),
            content_type: ContentType::Midi2,
            direction,
            minimum_size_in_bytes: 0,
        }
    }

    pub fn with_minimum_size(mut self, bytes: usize) -> Self {
        self.minimum_size_in_bytes = bytes;
        self
    }

    pub fn is_midi2_input(&self) -> bool {
        self.content_type == ContentType::Midi2 && self.direction == PortDirection::Input
    }

    pub fn is_midi2_output(&self) -> bool {
        self.content_type == ContentType::Midi2 && self.direction == PortDirection::Output
    }

    /// Bytes to allocate for this port.
    pub fn buffer_size(&self, num_frames: usize, default_control_buffer_size: usize) -> usize {
        match self.content_type {
            ContentType::Audio => num_frames * std::mem::size_of::<f32>(),
            _ if self.minimum_size_in_bytes > 0 => self.minimum_size_in_bytes,
            _ => default_control_buffer_size,
        }
    }
}
