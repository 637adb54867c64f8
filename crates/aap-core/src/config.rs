//! Host configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Size of one UMP SysEx8 packet in bytes.
const SYSEX8_PACKET_SIZE: usize = 16;

/// Default capacity for non-audio ports that do not declare a minimum size.
pub const DEFAULT_CONTROL_BUFFER_SIZE: usize = 8192;

/// Scratch capacity of every tunnel session.
pub const AAPXS_DATA_MAX_SIZE: usize = 1024;

/// Configuration shared by client and service instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    pub sample_rate: u32,
    /// UMP payload bytes per MIDI port (excluding the buffer header).
    pub midi_buffer_size: usize,
    pub default_control_buffer_size: usize,
    pub aapxs_data_max_size: usize,
    pub max_pending_callbacks: usize,
    /// Prefix for shared-memory backing names.
    #[serde(default = "default_shm_prefix")]
    pub shm_prefix: String,
}

fn default_shm_prefix() -> String {
    "aap_".to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            midi_buffer_size: 8192,
            default_control_buffer_size: DEFAULT_CONTROL_BUFFER_SIZE,
            aapxs_data_max_size: AAPXS_DATA_MAX_SIZE,
            max_pending_callbacks: 128,
            shm_prefix: default_shm_prefix(),
        }
    }
}

impl HostConfig {
    pub fn validate(&self) -> Result<()> {
        if !(8000..=384000).contains(&self.sample_rate) {
            return Err(Error::InvalidConfig(format!(
                "sample_rate {} out of range (8000-384000 Hz)",
                self.sample_rate
            )));
        }
        for (name, value) in [
            ("midi_buffer_size", self.midi_buffer_size),
            ("default_control_buffer_size", self.default_control_buffer_size),
            ("max_pending_callbacks", self.max_pending_callbacks),
        ] {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{} must be > 0", name)));
            }
        }
        if self.aapxs_data_max_size < SYSEX8_PACKET_SIZE {
            return Err(Error::InvalidConfig(format!(
                "aapxs_data_max_size {} is smaller than one SysEx8 packet",
                self.aapxs_data_max_size
            )));
        }
        Ok(())
    }
}
