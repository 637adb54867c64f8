//! AAPXS SysEx8 codec.
//!
//! An extension call is flattened into a Universal SysEx payload, then folded into SysEx8
//! packets:
//!
//! ```text
//! [7E 7F] [00] [00] [reserved x4] [request_id] [uri_size] [uri...] [opcode] [value_size] [value...]
//! ```
//!
//! All integers are 32-bit little-endian. Neither direction allocates: callers pass the
//! destination and a scratch buffer for the flat payload.

use aap_midi::sysex8::{
    self, read_sysex8, Sysex8Packet, Sysex8Read, SYSEX8_STATUS_COMPLETE, SYSEX8_STATUS_START,
};

/// Universal SysEx prefix plus the AAPXS code and extension flag.
const AAPXS_SIGNATURE: [u8; 4] = [0x7E, 0x7F, 0x00, 0x00];

/// Bytes before the URI: signature, reserved, request id, URI size.
pub const AAPXS_HEADER_SIZE: usize = 16;

/// Smallest valid payload: the header, opcode and value size with an empty URI and value.
pub const AAPXS_MIN_PAYLOAD_SIZE: usize = AAPXS_HEADER_SIZE + 8;

/// Stream id used for every AAPXS SysEx8 message.
const AAPXS_STREAM_ID: u8 = 0;

/// Flat payload size of a call.
#[inline]
pub const fn payload_size(uri_len: usize, data_len: usize) -> usize {
    AAPXS_MIN_PAYLOAD_SIZE + uri_len + data_len
}

/// Packet bytes needed to carry a call.
#[inline]
pub const fn encoded_size(uri_len: usize, data_len: usize) -> usize {
    sysex8::packet_count(payload_size(uri_len, data_len)) * sysex8::SYSEX8_PACKET_SIZE
}

#[inline]
fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let b = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// A decoded extension call. Borrows the caller's scratch buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AapxsCall<'a> {
    pub group: u8,
    pub request_id: u32,
    pub uri: &'a str,
    pub opcode: i32,
    pub data: &'a [u8],
}

/// Encodes one call into `dst` as SysEx8 packets, using `scratch` for the flat payload.
///
/// Returns the bytes written, or 0 when the call does not fit `dst` or `scratch`. Nothing is
/// written on failure.
#[allow(clippy::too_many_arguments)]
pub fn encode_aapxs_sysex8(
    dst: &mut [u8],
    scratch: &mut [u8],
    group: u8,
    request_id: u32,
    uri: &str,
    opcode: i32,
    data: &[u8],
) -> usize {
    let flat = payload_size(uri.len(), data.len());
    if flat > scratch.len() || encoded_size(uri.len(), data.len()) > dst.len() {
        return 0;
    }

    let mut pos = 0;
    let mut put = |bytes: &[u8]| {
        scratch[pos..pos + bytes.len()].copy_from_slice(bytes);
        pos += bytes.len();
    };
    put(&AAPXS_SIGNATURE);
    put(&[0; 4]);
    put(&request_id.to_le_bytes());
    put(&(uri.len() as u32).to_le_bytes());
    put(uri.as_bytes());
    put(&opcode.to_le_bytes());
    put(&(data.len() as u32).to_le_bytes());
    put(data);

    sysex8::forge_sysex8(group, AAPXS_STREAM_ID, &scratch[..flat], dst)
}

/// Decodes the AAPXS message starting at `offset` of a UMP sequence.
///
/// Returns the call and the offset just past its last packet, or `None` when the message is
/// not AAPXS (ordinary SysEx8 traffic), is truncated, or does not fit `scratch`.
pub fn decode_aapxs_sysex8<'a>(
    src: &[u8],
    offset: usize,
    scratch: &'a mut [u8],
) -> Option<(AapxsCall<'a>, usize)> {
    let first = Sysex8Packet::read(src, offset)?;
    if first.status() != SYSEX8_STATUS_START && first.status() != SYSEX8_STATUS_COMPLETE {
        return None;
    }
    // Cheap signature check on the first packet before reassembling anything.
    if first.data_len() < AAPXS_SIGNATURE.len()
        || (0..AAPXS_SIGNATURE.len()).any(|i| first.data_byte(i) != AAPXS_SIGNATURE[i])
    {
        return None;
    }

    let Sysex8Read::Complete {
        data_len,
        end_offset,
    } = read_sysex8(src, offset, scratch)
    else {
        return None;
    };
    let scratch: &'a [u8] = scratch;
    let payload = &scratch[..data_len];
    if payload.len() < AAPXS_MIN_PAYLOAD_SIZE {
        return None;
    }

    let request_id = read_u32(payload, 8)?;
    let uri_size = read_u32(payload, 12)? as usize;
    let uri_end = AAPXS_HEADER_SIZE.checked_add(uri_size)?;
    if payload.len() < uri_end + 8 {
        return None;
    }
    let uri = std::str::from_utf8(&payload[AAPXS_HEADER_SIZE..uri_end]).ok()?;
    let opcode = read_u32(payload, uri_end)? as i32;
    let value_size = read_u32(payload, uri_end + 4)? as usize;
    let value_start = uri_end + 8;
    let value_end = value_start.checked_add(value_size)?;
    if payload.len() < value_end {
        return None;
    }

    Some((
        AapxsCall {
            group: first.group(),
            request_id,
            uri,
            opcode,
            data: &payload[value_start..value_end],
        },
        end_offset,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aap_midi::ump;
    use proptest::prelude::*;

    const URI: &str = "urn://androidaudioplugin.org/extensions/presets/v1";

    #[test]
    fn test_encode_layout() {
        let mut dst = [0u8; 256];
        let mut scratch = [0u8; 256];
        let written = encode_aapxs_sysex8(&mut dst, &mut scratch, 0, 7, URI, 3, &2i32.to_le_bytes());
        assert_eq!(written, encoded_size(URI.len(), 4));
        assert_eq!(&scratch[..4], &AAPXS_SIGNATURE);
        assert_eq!(&scratch[8..12], &7u32.to_le_bytes());
        assert_eq!(&scratch[12..16], &(URI.len() as u32).to_le_bytes());

        // First packet: SysEx8 start, 13 data bytes (+ stream id), stream 0, then 0x7E.
        assert_eq!(ump::read_word(&dst, 0), Some(0x501E_007E));
    }

    #[test]
    fn test_roundtrip() {
        let mut dst = [0u8; 256];
        let mut scratch = [0u8; 256];
        let written = encode_aapxs_sysex8(&mut dst, &mut scratch, 2, 99, URI, 3, &[1, 2, 3, 4, 5]);

        let mut parse = [0u8; 256];
        let (call, end) = decode_aapxs_sysex8(&dst[..written], 0, &mut parse).unwrap();
        assert_eq!(end, written);
        assert_eq!(call.group, 2);
        assert_eq!(call.request_id, 99);
        assert_eq!(call.uri, URI);
        assert_eq!(call.opcode, 3);
        assert_eq!(call.data, &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_negative_opcode_survives() {
        let mut dst = [0u8; 256];
        let mut scratch = [0u8; 256];
        let written = encode_aapxs_sysex8(&mut dst, &mut scratch, 0, 1, URI, -2, &[]);
        let mut parse = [0u8; 256];
        let (call, _) = decode_aapxs_sysex8(&dst[..written], 0, &mut parse).unwrap();
        assert_eq!(call.opcode, -2);
        assert!(call.data.is_empty());
    }

    #[test]
    fn test_encode_capacity_failure_writes_nothing() {
        let mut dst = [0xAAu8; 32];
        let mut scratch = [0u8; 1024];
        assert_eq!(
            encode_aapxs_sysex8(&mut dst, &mut scratch, 0, 1, URI, 0, &[0; 64]),
            0
        );
        assert!(dst.iter().all(|b| *b == 0xAA));

        let mut dst = [0u8; 1024];
        let mut scratch = [0u8; 32];
        assert_eq!(
            encode_aapxs_sysex8(&mut dst, &mut scratch, 0, 1, URI, 0, &[]),
            0
        );
    }

    #[test]
    fn test_largest_payload_fits_scratch() {
        let max = 1024 - AAPXS_MIN_PAYLOAD_SIZE - URI.len();
        let mut dst = vec![0u8; encoded_size(URI.len(), max + 1)];
        let mut scratch = [0u8; 1024];
        let data = vec![0x5Au8; max + 1];

        assert_eq!(
            encode_aapxs_sysex8(&mut dst, &mut scratch, 0, 1, URI, 0, &data),
            0
        );
        let written = encode_aapxs_sysex8(&mut dst, &mut scratch, 0, 1, URI, 0, &data[..max]);
        assert!(written > 0);

        let mut parse = [0u8; 1024];
        let (call, _) = decode_aapxs_sysex8(&dst[..written], 0, &mut parse).unwrap();
        assert_eq!(call.data.len(), max);
    }

    #[test]
    fn test_plain_sysex8_is_not_aapxs() {
        let mut dst = [0u8; 64];
        let written = sysex8::forge_sysex8(0, 0, &[0x7D, 0x01, 0x02, 0x03, 0x04], &mut dst);
        let mut parse = [0u8; 64];
        assert!(decode_aapxs_sysex8(&dst[..written], 0, &mut parse).is_none());
    }

    #[test]
    fn test_truncated_message_is_rejected() {
        let mut dst = [0u8; 256];
        let mut scratch = [0u8; 256];
        let written = encode_aapxs_sysex8(&mut dst, &mut scratch, 0, 1, URI, 0, &[9; 20]);
        let mut parse = [0u8; 256];
        assert!(decode_aapxs_sysex8(&dst[..written - 16], 0, &mut parse).is_none());
    }

    #[test]
    fn test_continue_packet_is_not_a_start() {
        let mut dst = [0u8; 256];
        let mut scratch = [0u8; 256];
        let written = encode_aapxs_sysex8(&mut dst, &mut scratch, 0, 1, URI, 0, &[]);
        let mut parse = [0u8; 256];
        assert!(decode_aapxs_sysex8(&dst[..written], 16, &mut parse).is_none());
    }

    #[test]
    fn test_decode_into_small_scratch_fails() {
        let mut dst = [0u8; 256];
        let mut scratch = [0u8; 256];
        let written = encode_aapxs_sysex8(&mut dst, &mut scratch, 0, 1, URI, 0, &[0; 30]);
        let mut parse = [0u8; 40];
        assert!(decode_aapxs_sysex8(&dst[..written], 0, &mut parse).is_none());
    }

    proptest! {
        #[test]
        fn encode_then_decode_preserves_call(
            group in 0u8..16,
            request_id in any::<u32>(),
            opcode in any::<i32>(),
            uri in "[a-z:/.]{0,64}",
            data in prop::collection::vec(any::<u8>(), 0..200),
        ) {
            let mut dst = vec![0u8; 1024];
            let mut scratch = vec![0u8; 1024];
            let written = encode_aapxs_sysex8(&mut dst, &mut scratch, group, request_id, &uri, opcode, &data);
            prop_assert!(written > 0);

            let mut parse = vec![0u8; 1024];
            let (call, end) = decode_aapxs_sysex8(&dst[..written], 0, &mut parse).unwrap();
            prop_assert_eq!(end, written);
            prop_assert_eq!(call.group, group);
            prop_assert_eq!(call.request_id, request_id);
            prop_assert_eq!(call.uri, uri.as_str());
            prop_assert_eq!(call.opcode, opcode);
            prop_assert_eq!(call.data, &data[..]);
        }
    }
}
