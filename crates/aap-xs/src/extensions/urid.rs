//! URID extension: the host pushes its URID assignments to the plugin.

use super::midi::MAX_PLUGIN_ID_SIZE;
use super::{unknown_opcode, RequestContext};
use crate::dispatcher::InitiatorInstance;
use crate::error::{Result, XsError};
use std::sync::Arc;

pub const URID_EXTENSION_URI: &str = "urn://androidaudioplugin.org/extensions/urid/v3";

pub const MAX_EXTENSION_URI_SIZE: usize = 1024;

pub const URID_SHARED_MEMORY_SIZE: usize = MAX_PLUGIN_ID_SIZE + 8 + MAX_EXTENSION_URI_SIZE + 1;

pub const OPCODE_MAP: i32 = 1;

const URID_OFFSET: usize = 0;
const URI_LENGTH_OFFSET: usize = 1;
const URI_OFFSET: usize = 5;

pub trait UridExtension: Send {
    fn map(&mut self, urid: u8, uri: &str);
}

pub(crate) fn handle_request(
    ext: Option<&mut dyn UridExtension>,
    ctx: &RequestContext<'_>,
) -> Option<usize> {
    match ctx.opcode {
        OPCODE_MAP => {
            let s = ctx.serialization;
            let mut urid = [0u8; 1];
            let len = s.read_u32(URI_LENGTH_OFFSET).unwrap_or(0) as usize;
            let mut uri = vec![0u8; len.min(MAX_EXTENSION_URI_SIZE)];
            if s.read_at(URID_OFFSET, &mut urid) && s.read_at(URI_OFFSET, &mut uri) {
                if let Some(e) = ext {
                    e.map(urid[0], &String::from_utf8_lossy(&uri));
                }
            }
            Some(0)
        }
        _ => unknown_opcode(ctx),
    }
}

#[derive(Clone)]
pub struct UridClient {
    initiator: Arc<InitiatorInstance>,
}

impl UridClient {
    pub fn new(initiator: Arc<InitiatorInstance>) -> Self {
        Self { initiator }
    }

    pub fn map(&self, urid: u8, uri: &str) -> Result<()> {
        if uri.len() > MAX_EXTENSION_URI_SIZE {
            return Err(XsError::SharedMemory(format!(
                "URI of {} bytes exceeds {}",
                uri.len(),
                MAX_EXTENSION_URI_SIZE
            )));
        }
        self.initiator.call_void_function_synchronously(OPCODE_MAP, |s| {
            s.write_at(URID_OFFSET, &[urid]);
            s.write_u32(URI_LENGTH_OFFSET, uri.len() as u32);
            s.write_at(URI_OFFSET, uri.as_bytes());
            URI_OFFSET + uri.len()
        })
    }
}
