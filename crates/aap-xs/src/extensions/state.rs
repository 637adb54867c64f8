//! State extension: save and restore the plugin's full state as an opaque blob.

use super::{unknown_opcode, RequestContext};
use crate::dispatcher::InitiatorInstance;
use crate::error::{Result, XsError};
use std::sync::Arc;

pub const STATE_EXTENSION_URI: &str = "urn://androidaudioplugin.org/extensions/state/v3";

/// Largest state blob that can be exchanged.
pub const STATE_SHARED_MEMORY_SIZE: usize = 0x100000;

pub const OPCODE_GET_STATE_SIZE: i32 = 0;
pub const OPCODE_GET_STATE: i32 = 1;
pub const OPCODE_SET_STATE: i32 = 2;

pub trait StateExtension: Send {
    fn get_state_size(&mut self) -> usize;

    /// Writes the state into `dst` and returns its length.
    fn get_state(&mut self, dst: &mut [u8]) -> usize;

    fn set_state(&mut self, data: &[u8]);
}

pub(crate) fn handle_request(
    ext: Option<&mut dyn StateExtension>,
    ctx: &RequestContext<'_>,
) -> Option<usize> {
    let serialization = ctx.serialization;
    match ctx.opcode {
        OPCODE_GET_STATE_SIZE => {
            let size = ext.map_or(0, |e| e.get_state_size());
            serialization.write_i32(0, size as i32);
            Some(4)
        }
        OPCODE_GET_STATE => {
            let written = match ext {
                Some(e) => serialization.with_data_mut(|dst| e.get_state(dst)),
                None => 0,
            };
            Some(written.min(serialization.capacity()))
        }
        OPCODE_SET_STATE => {
            let size = ctx.data_size();
            if let Some(e) = ext {
                serialization.with_data(|data| e.set_state(&data[..size]));
            }
            None
        }
        _ => unknown_opcode(ctx),
    }
}

/// Typed access to a plugin's state extension.
#[derive(Clone)]
pub struct StateClient {
    initiator: Arc<InitiatorInstance>,
}

impl StateClient {
    pub fn new(initiator: Arc<InitiatorInstance>) -> Self {
        Self { initiator }
    }

    pub fn get_state_size(&self) -> Result<usize> {
        self.initiator.call_typed_function_synchronously(
            OPCODE_GET_STATE_SIZE,
            |_| 0,
            |s, _| {
                s.read_i32(0)
                    .map(|size| size.max(0) as usize)
                    .ok_or_else(|| self.initiator.malformed(OPCODE_GET_STATE_SIZE, "no size"))
            },
        )
    }

    pub fn get_state(&self) -> Result<Vec<u8>> {
        self.initiator.call_typed_function_synchronously(
            OPCODE_GET_STATE,
            |_| 0,
            |s, reply| Ok(s.with_data(|data| data[..reply.data_size.min(data.len())].to_vec())),
        )
    }

    /// Restores `data`. The plugin sends no reply, so this does not wait; it fails with
    /// [`XsError::Busy`] while another state call is in flight.
    pub fn set_state(&self, data: &[u8]) -> Result<()> {
        let capacity = self.initiator.serialization().capacity();
        if data.len() > capacity {
            return Err(XsError::SharedMemory(format!(
                "state of {} bytes exceeds the {} byte state buffer",
                data.len(),
                capacity
            )));
        }
        self.initiator
            .fire_void_function_and_forget(OPCODE_SET_STATE, |s| {
                s.write_at(0, data);
                data.len()
            })
    }
}
