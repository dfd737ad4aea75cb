//! C4 — GTP-U tunnel codec. No published crate in this workspace's
//! dependency graph covers GTP-U framing, so unlike PFCP this is first-party,
//! grounded stylistically in the teacher's low-level IE byte manipulation
//! (`message::header`, fixed offsets, big-endian fields, explicit length
//! checks returning a typed error rather than panicking).

use std::net::{SocketAddr, UdpSocket};

pub const GPDU: u8 = 0xff;
pub const ECHO_REQUEST: u8 = 1;
pub const ECHO_RESPONSE: u8 = 2;

const PDU_SESSION_CONTAINER: u8 = 0x85;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduSessionDirection {
    Downlink,
    Uplink,
}

#[derive(Debug, Clone, Copy)]
pub struct DecodedHeader {
    pub version: u8,
    pub message_type: u8,
    pub tunnel_id: u32,
    pub sequence: Option<u16>,
    pub flow_id: Option<u8>,
    pub pdu_direction: Option<PduSessionDirection>,
    pub payload_offset: usize,
}

/// Parses the mandatory 8-byte header, the optional 4-byte seq/npdu/next-ext
/// block, and any extension header chain, stopping at the first payload byte.
/// Malformed framing (truncated header, truncated extension, or an extension
/// claiming a length of zero) yields `None` — a per-packet condition the
/// caller counts, never a `UpfError` (reserved for process-boundary failures).
pub fn decode(data: &[u8]) -> Option<DecodedHeader> {
    if data.len() < 8 {
        return None;
    }
    let flags = data[0];
    let version = (flags >> 5) & 0x07;
    let e = (flags >> 2) & 1 != 0;
    let s = (flags >> 1) & 1 != 0;
    let pn = flags & 1 != 0;
    let message_type = data[1];
    let tunnel_id = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);

    let mut offset = 8;
    let mut sequence = None;
    let mut flow_id = None;
    let mut pdu_direction = None;

    if e || s || pn {
        if data.len() < 12 {
            return None;
        }
        if s {
            sequence = Some(u16::from_be_bytes([data[8], data[9]]));
        }
        let mut next_ext_type = data[11];
        offset = 12;

        while next_ext_type != 0 {
            if offset >= data.len() {
                return None;
            }
            let ext_len_words = data[offset];
            if ext_len_words == 0 {
                return None;
            }
            let ext_total = ext_len_words as usize * 4;
            if offset + ext_total > data.len() {
                return None;
            }
            if next_ext_type == PDU_SESSION_CONTAINER && ext_total >= 4 {
                let pdu_type_byte = data[offset + 1];
                let qfi_byte = data[offset + 2];
                pdu_direction = Some(if pdu_type_byte >> 4 == 1 {
                    PduSessionDirection::Uplink
                } else {
                    PduSessionDirection::Downlink
                });
                flow_id = Some(qfi_byte & 0x3f);
            }
            next_ext_type = data[offset + ext_total - 1];
            offset += ext_total;
        }
    }

    Some(DecodedHeader {
        version,
        message_type,
        tunnel_id,
        sequence,
        flow_id,
        pdu_direction,
        payload_offset: offset,
    })
}

/// Encodes a plain G-PDU (no extension headers) into `dst`, returning the
/// number of bytes written, or `None` if `dst` can't hold header + payload.
pub fn encode_gpdu(dst: &mut [u8], tunnel_id: u32, payload: &[u8]) -> Option<usize> {
    let total = 8 + payload.len();
    if dst.len() < total {
        return None;
    }
    write_mandatory_header(dst, GPDU, tunnel_id, payload.len() as u16, false);
    dst[8..total].copy_from_slice(payload);
    Some(total)
}

/// Encodes a G-PDU carrying a PDU-session-container extension with a 6-bit
/// flow identifier (§6 wire format).
pub fn encode_gpdu_with_flow(
    dst: &mut [u8],
    tunnel_id: u32,
    flow_id: u8,
    direction: PduSessionDirection,
    payload: &[u8],
) -> Option<usize> {
    let optional_and_ext = 4 + 4;
    let total = 8 + optional_and_ext + payload.len();
    if dst.len() < total {
        return None;
    }
    let length = (optional_and_ext + payload.len()) as u16;
    write_mandatory_header(dst, GPDU, tunnel_id, length, true);
    dst[8] = 0; // sequence number (unused for G-PDU)
    dst[9] = 0;
    dst[10] = 0; // N-PDU number
    dst[11] = PDU_SESSION_CONTAINER;

    let pdu_type_nibble = match direction {
        PduSessionDirection::Uplink => 1u8,
        PduSessionDirection::Downlink => 0u8,
    };
    dst[12] = 1; // extension length, in 4-byte units
    dst[13] = pdu_type_nibble << 4;
    dst[14] = flow_id & 0x3f;
    dst[15] = 0; // next extension header type: none

    let payload_start = 16;
    dst[payload_start..total].copy_from_slice(payload);
    Some(total)
}

fn write_mandatory_header(dst: &mut [u8], message_type: u8, tunnel_id: u32, length: u16, has_optional: bool) {
    let mut flags = 1u8 << 5; // version 1
    flags |= 1 << 4; // protocol type: GTP (not GTP')
    if has_optional {
        flags |= 1 << 2; // E flag
    }
    dst[0] = flags;
    dst[1] = message_type;
    dst[2..4].copy_from_slice(&length.to_be_bytes());
    dst[4..8].copy_from_slice(&tunnel_id.to_be_bytes());
}

pub fn is_echo_request(data: &[u8]) -> bool {
    data.len() >= 2 && data[1] == ECHO_REQUEST
}

pub fn is_echo_response(data: &[u8]) -> bool {
    data.len() >= 2 && data[1] == ECHO_RESPONSE
}

/// Idempotent; never mutates any shared state. Echoes the request's sequence
/// number when present, otherwise replies with zero. Returns whether the
/// reply was sent successfully.
pub fn handle_echo_request(socket: &UdpSocket, request: &[u8], peer: SocketAddr) -> bool {
    let decoded = match decode(request) {
        Some(d) => d,
        None => return false,
    };
    let seq = decoded.sequence.unwrap_or(0);
    let mut reply = [0u8; 12];
    write_mandatory_header(&mut reply, ECHO_RESPONSE, decoded.tunnel_id, 4, true);
    reply[8..10].copy_from_slice(&seq.to_be_bytes());
    reply[10] = 0;
    reply[11] = 0;
    socket.send_to(&reply, peer).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plain_gpdu() {
        let payload = [1u8, 2, 3, 4, 5];
        let mut buf = [0u8; 64];
        let n = encode_gpdu(&mut buf, 0xdeadbeef, &payload).unwrap();
        let decoded = decode(&buf[..n]).unwrap();
        assert_eq!(decoded.message_type, GPDU);
        assert_eq!(decoded.tunnel_id, 0xdeadbeef);
        assert_eq!(&buf[decoded.payload_offset..n], &payload);
    }

    #[test]
    fn round_trips_gpdu_with_flow_id() {
        let payload = [9u8; 20];
        let mut buf = [0u8; 64];
        let n = encode_gpdu_with_flow(&mut buf, 7, 42, PduSessionDirection::Uplink, &payload).unwrap();
        let decoded = decode(&buf[..n]).unwrap();
        assert_eq!(decoded.tunnel_id, 7);
        assert_eq!(decoded.flow_id, Some(42));
        assert_eq!(decoded.pdu_direction, Some(PduSessionDirection::Uplink));
        assert_eq!(&buf[decoded.payload_offset..n], &payload);
    }

    #[test]
    fn rejects_truncated_header() {
        let buf = [0u8; 4];
        assert!(decode(&buf).is_none());
    }

    #[test]
    fn rejects_zero_length_extension() {
        let mut buf = [0u8; 16];
        write_mandatory_header(&mut buf, GPDU, 1, 4, true);
        buf[11] = PDU_SESSION_CONTAINER;
        buf[12] = 0;
        assert!(decode(&buf).is_none());
    }

    #[test]
    fn recognizes_echo_message_types() {
        let mut req = [0u8; 8];
        write_mandatory_header(&mut req, ECHO_REQUEST, 0, 0, false);
        assert!(is_echo_request(&req));
        let mut resp = req;
        resp[1] = ECHO_RESPONSE;
        assert!(is_echo_response(&resp));
    }
}
