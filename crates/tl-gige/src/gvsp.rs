//! GVSP framer (C6): fragments an image buffer into leader/payload/trailer
//! UDP packets with monotonic frame and block IDs.
//!
//! GVSP reception has no counterpart here — only transmission, toward the
//! stream destination the controller programmed into the register backend.

use std::net::{SocketAddr, UdpSocket};

use tracing::warn;

/// Minimum GVSP packet size (GigE Vision 1.2).
pub const GVSP_MIN_PACKET_SIZE: u32 = 576;
/// Maximum GVSP packet size (GigE Vision 1.2).
pub const GVSP_MAX_PACKET_SIZE: u32 = 9000;
/// Packet size substituted when the stream channel's packet-size register
/// reads zero.
pub const GVSP_DEFAULT_PACKET_SIZE: u32 = 1400;
/// Fixed GVSP header size (standard, non-extended form).
pub const GVSP_OVERHEAD: usize = 8;

const FORMAT_PAYLOAD: u8 = 0;
const FORMAT_LEADER: u8 = 1;
const FORMAT_TRAILER: u8 = 2;

/// Clamp a packet-size register value to the legal GVSP range, substituting
/// the default when the register reads zero.
pub fn clamp_packet_size(requested: u32) -> u32 {
    if requested == 0 {
        GVSP_DEFAULT_PACKET_SIZE
    } else {
        requested.clamp(GVSP_MIN_PACKET_SIZE, GVSP_MAX_PACKET_SIZE)
    }
}

/// Advance a frame identifier, wrapping through `1..=65535` and skipping 0.
pub fn next_frame_id(frame_id: u16) -> u16 {
    match frame_id.wrapping_add(1) {
        0 => 1,
        next => next,
    }
}

/// Image geometry and pixel format carried by the leader packet.
#[derive(Debug, Clone, Copy)]
pub struct FrameGeometry {
    pub pixel_format: u32,
    pub width: u32,
    pub height: u32,
}

fn write_header(buf: &mut Vec<u8>, frame_id: u16, block_id: u16, format: u8) {
    buf.extend_from_slice(&0u16.to_be_bytes()); // status, always success for a simulated source
    buf.extend_from_slice(&frame_id.to_be_bytes());
    buf.extend_from_slice(&block_id.to_be_bytes());
    buf.push(format);
    buf.push(0); // reserved
}

fn send_one(socket: &UdpSocket, dest: SocketAddr, buf: &[u8]) -> bool {
    match socket.send_to(buf, dest) {
        Ok(_) => true,
        Err(err) => {
            warn!(?err, %dest, "GVSP send failed, dropping packet");
            false
        }
    }
}

/// Frame an image buffer and send it to `dest` over `socket`, building every
/// packet into the caller-owned `scratch` buffer so no per-packet allocation
/// occurs (`scratch` should be sized `GVSP_MAX_PACKET_SIZE` once and reused
/// across frames). Every packet is a single best-effort UDP send; failures
/// are logged and do not abort the remaining packets or the frame sequence —
/// GVSP is lossy by design.
///
/// Returns the number of packets successfully sent (1 leader + N payload +
/// 1 trailer, minus any that failed to send).
pub fn send_frame(
    socket: &UdpSocket,
    dest: SocketAddr,
    scratch: &mut Vec<u8>,
    frame_id: u16,
    geometry: FrameGeometry,
    payload: &[u8],
    timestamp_ns: u64,
    packet_size_limit: u32,
) -> usize {
    let packet_size = clamp_packet_size(packet_size_limit) as usize;
    let chunk_size = packet_size.saturating_sub(GVSP_OVERHEAD).max(1);

    let mut sent = 0usize;
    let mut block_id: u16 = 0;

    scratch.clear();
    write_header(scratch, frame_id, block_id, FORMAT_LEADER);
    scratch.extend_from_slice(&((timestamp_ns >> 32) as u32).to_be_bytes());
    scratch.extend_from_slice(&(timestamp_ns as u32).to_be_bytes());
    scratch.extend_from_slice(&geometry.pixel_format.to_be_bytes());
    scratch.extend_from_slice(&geometry.width.to_be_bytes());
    scratch.extend_from_slice(&geometry.height.to_be_bytes());
    scratch.extend_from_slice(&0u32.to_be_bytes()); // x_offset
    scratch.extend_from_slice(&0u32.to_be_bytes()); // y_offset
    scratch.extend_from_slice(&0u32.to_be_bytes()); // x_padding
    scratch.extend_from_slice(&0u32.to_be_bytes()); // y_padding
    if send_one(socket, dest, scratch) {
        sent += 1;
    }

    for chunk in payload.chunks(chunk_size) {
        block_id += 1;
        scratch.clear();
        write_header(scratch, frame_id, block_id, FORMAT_PAYLOAD);
        scratch.extend_from_slice(chunk);
        if send_one(socket, dest, scratch) {
            sent += 1;
        }
    }

    block_id += 1;
    scratch.clear();
    write_header(scratch, frame_id, block_id, FORMAT_TRAILER);
    scratch.extend_from_slice(&geometry.height.to_be_bytes());
    if send_one(socket, dest, scratch) {
        sent += 1;
    }

    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn packet_size_clamping() {
        assert_eq!(clamp_packet_size(0), GVSP_DEFAULT_PACKET_SIZE);
        assert_eq!(clamp_packet_size(100), GVSP_MIN_PACKET_SIZE);
        assert_eq!(clamp_packet_size(20_000), GVSP_MAX_PACKET_SIZE);
        assert_eq!(clamp_packet_size(1500), 1500);
    }

    #[test]
    fn frame_id_wraps_and_skips_zero() {
        assert_eq!(next_frame_id(0), 1);
        assert_eq!(next_frame_id(65535), 1);
        assert_eq!(next_frame_id(1), 2);
    }

    #[test]
    fn fragmentation_matches_packet_count_and_reassembles() {
        let listener = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        listener.set_nonblocking(false).unwrap();
        let dest = listener.local_addr().unwrap();
        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();

        let payload: Vec<u8> = (0u32..307_200).map(|i| (i % 256) as u8).collect();
        let packet_size = 1500u32;
        let chunk_size = (packet_size as usize) - GVSP_OVERHEAD;
        let expected_payload_packets = payload.len().div_ceil(chunk_size);

        let mut scratch = Vec::new();
        let sent = send_frame(
            &sender,
            dest,
            &mut scratch,
            1,
            FrameGeometry {
                pixel_format: 0x0101_0001,
                width: 640,
                height: 480,
            },
            &payload,
            1_700_000_000_000_000_000,
            packet_size,
        );
        assert_eq!(sent, expected_payload_packets + 2);

        let mut reassembled = Vec::with_capacity(payload.len());
        let mut saw_leader = false;
        let mut saw_trailer = false;
        let mut last_block_id = -1i32;
        let mut buf = [0u8; 2048];
        for _ in 0..sent {
            let (len, _) = listener.recv_from(&mut buf).unwrap();
            let frame_id = u16::from_be_bytes([buf[2], buf[3]]);
            assert_eq!(frame_id, 1);
            let block_id = u16::from_be_bytes([buf[4], buf[5]]);
            assert_eq!(block_id as i32, last_block_id + 1);
            last_block_id = block_id as i32;
            match buf[6] {
                1 => {
                    saw_leader = true;
                    assert_eq!(block_id, 0);
                }
                0 => reassembled.extend_from_slice(&buf[GVSP_OVERHEAD..len]),
                2 => {
                    saw_trailer = true;
                    let height = u32::from_be_bytes(buf[GVSP_OVERHEAD..GVSP_OVERHEAD + 4].try_into().unwrap());
                    assert_eq!(height, 480);
                }
                other => panic!("unexpected packet format {other}"),
            }
        }
        assert!(saw_leader && saw_trailer);
        assert_eq!(reassembled, payload);
    }
}
