//! MIDI extension: lets the host ask which MIDI messages a plugin consumes itself.

use super::{unknown_opcode, RequestContext};
use crate::dispatcher::InitiatorInstance;
use crate::error::Result;
use aap_midi::MappingPolicy;
use std::sync::Arc;

pub const MIDI_EXTENSION_URI: &str = "urn://androidaudioplugin.org/extensions/midi2/v1";

pub const MAX_PLUGIN_ID_SIZE: usize = 1024;

pub const MIDI_SHARED_MEMORY_SIZE: usize = MAX_PLUGIN_ID_SIZE + 4;

pub const OPCODE_GET_MAPPING_POLICY: i32 = 1;

pub trait MidiExtension: Send {
    fn get_mapping_policy(&mut self, plugin_id: &str) -> MappingPolicy;
}

/// Reads a length-prefixed plugin id written by [`write_plugin_id`].
pub(crate) fn read_plugin_id(ctx: &RequestContext<'_>, offset: usize) -> (String, usize) {
    let s = ctx.serialization;
    let len = s.read_i32(offset).unwrap_or(0).clamp(0, MAX_PLUGIN_ID_SIZE as i32) as usize;
    let mut bytes = vec![0u8; len];
    if !s.read_at(offset + 4, &mut bytes) {
        return (String::new(), offset + 4);
    }
    (String::from_utf8_lossy(&bytes).into_owned(), offset + 4 + len)
}

/// Writes `plugin_id` as an i32 length followed by its bytes. Returns the end offset.
pub(crate) fn write_plugin_id(
    s: &crate::serialization::SerializationContext,
    offset: usize,
    plugin_id: &str,
) -> usize {
    let bytes = &plugin_id.as_bytes()[..plugin_id.len().min(MAX_PLUGIN_ID_SIZE)];
    s.write_i32(offset, bytes.len() as i32);
    s.write_at(offset + 4, bytes);
    offset + 4 + bytes.len()
}

pub(crate) fn handle_request(
    ext: Option<&mut dyn MidiExtension>,
    ctx: &RequestContext<'_>,
) -> Option<usize> {
    match ctx.opcode {
        OPCODE_GET_MAPPING_POLICY => {
            let (plugin_id, _) = read_plugin_id(ctx, 0);
            let policy = ext.map_or(MappingPolicy::NONE, |e| e.get_mapping_policy(&plugin_id));
            ctx.serialization.write_i32(0, policy.bits() as i32);
            Some(4)
        }
        _ => unknown_opcode(ctx),
    }
}

#[derive(Clone)]
pub struct MidiClient {
    initiator: Arc<InitiatorInstance>,
}

impl MidiClient {
    pub fn new(initiator: Arc<InitiatorInstance>) -> Self {
        Self { initiator }
    }

    pub fn get_mapping_policy(&self, plugin_id: &str) -> Result<MappingPolicy> {
        self.initiator.call_typed_function_synchronously(
            OPCODE_GET_MAPPING_POLICY,
            |s| write_plugin_id(s, 0, plugin_id),
            |s, _| {
                s.read_i32(0)
                    .map(|bits| MappingPolicy::from_bits(bits as u32))
                    .ok_or_else(|| self.initiator.malformed(OPCODE_GET_MAPPING_POLICY, "no policy"))
            },
        )
    }
}
