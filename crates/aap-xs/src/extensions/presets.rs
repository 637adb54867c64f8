//! Presets extension.
//!
//! Plugin side: enumerate presets and select one by index. Host side: the plugin notifies the
//! host when a preset was loaded or the preset list changed.

use super::{unknown_opcode, RequestContext};
use crate::dispatcher::InitiatorInstance;
use crate::error::Result;
use std::sync::Arc;

pub const PRESETS_EXTENSION_URI: &str = "urn://androidaudioplugin.org/extensions/presets/v1";

pub const MAX_PRESET_NAME_LENGTH: usize = 256;

/// Preset record (id + name) plus room for the index arguments.
pub const PRESETS_SHARED_MEMORY_SIZE: usize = 4 + MAX_PRESET_NAME_LENGTH + 4 + 4 + 4;

pub const OPCODE_GET_PRESET_COUNT: i32 = 0;
pub const OPCODE_GET_PRESET_DATA: i32 = 1;
pub const OPCODE_GET_PRESET_INDEX: i32 = 2;
pub const OPCODE_SET_PRESET_INDEX: i32 = 3;

pub const OPCODE_NOTIFY_PRESET_LOADED: i32 = -1;
pub const OPCODE_NOTIFY_PRESETS_UPDATED: i32 = -2;

const PRESET_ID_OFFSET: usize = 0;
const PRESET_NAME_OFFSET: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetInfo {
    /// Stable across plugin versions, unlike the index.
    pub id: i32,
    pub name: String,
}

pub trait PresetsExtension: Send {
    fn get_preset_count(&mut self) -> i32;

    fn get_preset(&mut self, index: i32) -> Option<PresetInfo>;

    fn get_preset_index(&mut self) -> i32;

    fn set_preset_index(&mut self, index: i32);
}

pub trait PresetsHostExtension: Send {
    fn notify_preset_loaded(&mut self);

    fn notify_presets_updated(&mut self);
}

pub(crate) fn handle_request(
    ext: Option<&mut dyn PresetsExtension>,
    ctx: &RequestContext<'_>,
) -> Option<usize> {
    let s = ctx.serialization;
    match ctx.opcode {
        OPCODE_GET_PRESET_COUNT => {
            s.write_i32(0, ext.map_or(0, |e| e.get_preset_count()));
            Some(4)
        }
        OPCODE_GET_PRESET_DATA => {
            let index = s.read_i32(0).unwrap_or(-1);
            let preset = ext.and_then(|e| e.get_preset(index));
            let (id, name) = match &preset {
                Some(p) => (p.id, p.name.as_str()),
                None => (-1, ""),
            };
            s.write_i32(PRESET_ID_OFFSET, id);
            s.write_str(PRESET_NAME_OFFSET, MAX_PRESET_NAME_LENGTH, name);
            Some(PRESET_NAME_OFFSET + MAX_PRESET_NAME_LENGTH)
        }
        OPCODE_GET_PRESET_INDEX => {
            s.write_i32(0, ext.map_or(-1, |e| e.get_preset_index()));
            Some(4)
        }
        OPCODE_SET_PRESET_INDEX => {
            if let (Some(e), Some(index)) = (ext, s.read_i32(0)) {
                e.set_preset_index(index);
            }
            Some(0)
        }
        _ => unknown_opcode(ctx),
    }
}

pub(crate) fn handle_host_request(
    ext: &mut dyn PresetsHostExtension,
    ctx: &RequestContext<'_>,
) -> Option<usize> {
    match ctx.opcode {
        OPCODE_NOTIFY_PRESET_LOADED => ext.notify_preset_loaded(),
        OPCODE_NOTIFY_PRESETS_UPDATED => ext.notify_presets_updated(),
        _ => {
            tracing::warn!(uri = ctx.uri, opcode = ctx.opcode, "Unknown host opcode");
        }
    }
    None
}

/// Typed access to a plugin's presets extension.
#[derive(Clone)]
pub struct PresetsClient {
    initiator: Arc<InitiatorInstance>,
}

impl PresetsClient {
    pub fn new(initiator: Arc<InitiatorInstance>) -> Self {
        Self { initiator }
    }

    fn read_i32_reply(&self, opcode: i32) -> Result<i32> {
        self.initiator.call_typed_function_synchronously(
            opcode,
            |_| 0,
            |s, _| {
                s.read_i32(0)
                    .ok_or_else(|| self.initiator.malformed(opcode, "missing i32"))
            },
        )
    }

    pub fn get_preset_count(&self) -> Result<i32> {
        self.read_i32_reply(OPCODE_GET_PRESET_COUNT)
    }

    pub fn get_preset(&self, index: i32) -> Result<PresetInfo> {
        self.initiator.call_typed_function_synchronously(
            OPCODE_GET_PRESET_DATA,
            |s| {
                s.write_i32(0, index);
                4
            },
            |s, reply| {
                if reply.data_size < PRESET_NAME_OFFSET + MAX_PRESET_NAME_LENGTH {
                    return Err(self
                        .initiator
                        .malformed(OPCODE_GET_PRESET_DATA, "short preset record"));
                }
                let id = s.read_i32(PRESET_ID_OFFSET).unwrap_or(-1);
                let name = s
                    .read_str(PRESET_NAME_OFFSET, MAX_PRESET_NAME_LENGTH)
                    .unwrap_or_default();
                Ok(PresetInfo { id, name })
            },
        )
    }

    pub fn get_preset_index(&self) -> Result<i32> {
        self.read_i32_reply(OPCODE_GET_PRESET_INDEX)
    }

    pub fn set_preset_index(&self, index: i32) -> Result<()> {
        self.initiator
            .call_void_function_synchronously(OPCODE_SET_PRESET_INDEX, |s| {
                s.write_i32(0, index);
                4
            })
    }
}

/// Host notifications sent by the plugin side.
#[derive(Clone)]
pub struct PresetsService {
    initiator: Arc<InitiatorInstance>,
}

impl PresetsService {
    pub fn new(initiator: Arc<InitiatorInstance>) -> Self {
        Self { initiator }
    }

    pub fn notify_preset_loaded(&self) -> Result<()> {
        self.initiator
            .fire_void_function_and_forget(OPCODE_NOTIFY_PRESET_LOADED, |_| 0)
    }

    pub fn notify_presets_updated(&self) -> Result<()> {
        self.initiator
            .fire_void_function_and_forget(OPCODE_NOTIFY_PRESETS_UPDATED, |_| 0)
    }
}
