//! Plugin instances on both sides of the connection.
//!
//! - [`RemotePluginInstance`]: the host's handle to a plugin living behind a [`DirectChannel`]
//! - [`LocalPluginInstance`]: the service's wrapper around an [`AudioPlugin`]
//!
//! [`DirectChannel`]: aap_xs::DirectChannel
//! [`AudioPlugin`]: crate::AudioPlugin

mod local;
mod remote;

pub use local::LocalPluginInstance;
pub use remote::{MidiInputHandle, RemotePluginInstance};

use aap_xs::codec::encoded_size;
use aap_xs::{encode_aapxs_sysex8, AapxsRequest, PortInfo, XsError};

/// Encodes `request` with its current payload as an AAPXS SysEx8 sequence on group 0.
///
/// Called from control threads only; allocates the packet and scratch buffers.
fn encode_request(request: &AapxsRequest<'_>, data_max_size: usize) -> aap_xs::Result<Vec<u8>> {
    let data = request.serialization.to_vec();
    let mut packets = vec![0u8; encoded_size(request.uri.len(), data.len())];
    let mut scratch = vec![0u8; data_max_size];
    let written = encode_aapxs_sysex8(
        &mut packets,
        &mut scratch,
        0,
        request.request_id,
        request.uri,
        request.opcode,
        &data,
    );
    if written == 0 {
        return Err(XsError::EncodeOverflow {
            uri: request.uri.to_string(),
            opcode: request.opcode,
        });
    }
    packets.truncate(written);
    Ok(packets)
}

fn midi2_inputs(ports: &[PortInfo]) -> impl Iterator<Item = usize> + '_ {
    ports
        .iter()
        .enumerate()
        .filter_map(|(index, port)| port.is_midi2_input().then_some(index))
}

fn midi2_outputs(ports: &[PortInfo]) -> impl Iterator<Item = usize> + '_ {
    ports
        .iter()
        .enumerate()
        .filter_map(|(index, port)| port.is_midi2_output().then_some(index))
}
