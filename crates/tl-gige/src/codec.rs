//! GVCP server-side codec: parses inbound command packets and builds acks.
//!
//! This is the wire format the simulated camera answers on: packets use the
//! GVCP header layout (`packet_type`/`packet_flags` as separate bytes).
//! Opcodes are shared with [`crate::gvcp::consts`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tracing::warn;

use crate::gvcp::consts;

/// Size of the GVCP packet header, in bytes.
pub const HEADER_SIZE: usize = 8;

/// `packet_type` value identifying a command packet.
pub const PACKET_TYPE_CMD: u8 = 0x42;
/// `packet_type` value identifying an acknowledgement packet.
pub const PACKET_TYPE_ACK: u8 = 0x00;

/// Errors raised while decoding an inbound GVCP datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("packet shorter than the GVCP header")]
    TooShort,
    #[error("declared data_length {declared} exceeds the {available} bytes received")]
    LengthMismatch { declared: usize, available: usize },
    #[error("malformed {0} payload")]
    MalformedPayload(&'static str),
}

/// GVCP packet header, symmetric between commands and acknowledgements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GvcpHeader {
    pub packet_type: u8,
    pub packet_flags: u8,
    pub command: u16,
    pub data_length: u16,
    pub packet_id: u16,
}

impl GvcpHeader {
    fn encode(self, out: &mut BytesMut) {
        out.put_u8(self.packet_type);
        out.put_u8(self.packet_flags);
        out.put_u16(self.command);
        out.put_u16(self.data_length);
        out.put_u16(self.packet_id);
    }
}

/// A decoded inbound command, ready for the engine to apply to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Discovery,
    ReadMemory { address: u32, size: u16 },
    WriteMemory { address: u32, data: Bytes },
    ReadRegister { address: u32 },
    WriteRegister { address: u32, value: u32 },
}

/// Parse an inbound datagram into its header and recognised command.
///
/// Returns `Ok(None)` for a well-formed packet that is not a `CMD`, or whose
/// command is not one of the five recognised opcodes — per the protocol
/// these are dropped without an ack; the caller logs the drop.
pub fn parse_command(buf: &[u8]) -> Result<Option<(GvcpHeader, Command)>, CodecError> {
    if buf.len() < HEADER_SIZE {
        return Err(CodecError::TooShort);
    }
    let mut cursor = buf;
    let packet_type = cursor.get_u8();
    let packet_flags = cursor.get_u8();
    let command = cursor.get_u16();
    let data_length = cursor.get_u16();
    let packet_id = cursor.get_u16();
    let header = GvcpHeader {
        packet_type,
        packet_flags,
        command,
        data_length,
        packet_id,
    };

    if data_length as usize > cursor.remaining() {
        return Err(CodecError::LengthMismatch {
            declared: data_length as usize,
            available: cursor.remaining(),
        });
    }
    let payload = &cursor[..data_length as usize];

    if packet_type != PACKET_TYPE_CMD {
        warn!(packet_type, "ignoring non-command GVCP packet");
        return Ok(None);
    }

    let parsed = match command {
        consts::DISCOVERY_COMMAND => Command::Discovery,
        consts::READ_MEMORY_CMD => parse_read_memory(payload)?,
        consts::WRITE_MEMORY_CMD => parse_write_memory(payload)?,
        consts::READ_REGISTER_CMD => parse_read_register(payload)?,
        consts::WRITE_REGISTER_CMD => parse_write_register(payload)?,
        other => {
            warn!(command = format!("{other:#06x}"), "unknown GVCP command");
            return Ok(None);
        }
    };
    Ok(Some((header, parsed)))
}

fn parse_read_memory(payload: &[u8]) -> Result<Command, CodecError> {
    if payload.len() < 8 {
        return Err(CodecError::MalformedPayload("READ_MEMORY_CMD"));
    }
    let mut cursor = payload;
    let address = cursor.get_u32();
    let size = cursor.get_u16();
    Ok(Command::ReadMemory { address, size })
}

fn parse_write_memory(payload: &[u8]) -> Result<Command, CodecError> {
    if payload.len() < 4 {
        return Err(CodecError::MalformedPayload("WRITE_MEMORY_CMD"));
    }
    let mut cursor = payload;
    let address = cursor.get_u32();
    let data = Bytes::copy_from_slice(cursor);
    Ok(Command::WriteMemory { address, data })
}

fn parse_read_register(payload: &[u8]) -> Result<Command, CodecError> {
    if payload.len() < 4 {
        return Err(CodecError::MalformedPayload("READ_REGISTER_CMD"));
    }
    let mut cursor = payload;
    let address = cursor.get_u32();
    Ok(Command::ReadRegister { address })
}

fn parse_write_register(payload: &[u8]) -> Result<Command, CodecError> {
    if payload.len() < 8 {
        return Err(CodecError::MalformedPayload("WRITE_REGISTER_CMD"));
    }
    let mut cursor = payload;
    let address = cursor.get_u32();
    let value = cursor.get_u32();
    Ok(Command::WriteRegister { address, value })
}

fn build_ack(command: u16, packet_id: u16, payload: &[u8]) -> Bytes {
    let header = GvcpHeader {
        packet_type: PACKET_TYPE_ACK,
        packet_flags: 0,
        command,
        data_length: payload.len() as u16,
        packet_id,
    };
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    header.encode(&mut buf);
    buf.extend_from_slice(payload);
    buf.freeze()
}

/// Build a `DISCOVERY_ACK` carrying the backend's discovery descriptor.
pub fn build_discovery_ack(packet_id: u16, descriptor: &[u8]) -> Bytes {
    build_ack(consts::DISCOVERY_ACK, packet_id, descriptor)
}

/// Build a `READ_MEMORY_ACK` echoing the address and the bytes read.
pub fn build_read_memory_ack(packet_id: u16, address: u32, data: &[u8]) -> Bytes {
    let mut payload = BytesMut::with_capacity(4 + data.len());
    payload.put_u32(address);
    payload.extend_from_slice(data);
    build_ack(consts::READ_MEMORY_ACK, packet_id, &payload)
}

/// Build a `WRITE_MEMORY_ACK` echoing the written address.
pub fn build_write_memory_ack(packet_id: u16, address: u32) -> Bytes {
    let mut payload = BytesMut::with_capacity(4);
    payload.put_u32(address);
    build_ack(consts::WRITE_MEMORY_ACK, packet_id, &payload)
}

/// Build a `READ_REGISTER_ACK` carrying the register's value.
pub fn build_read_register_ack(packet_id: u16, value: u32) -> Bytes {
    let mut payload = BytesMut::with_capacity(4);
    payload.put_u32(value);
    build_ack(consts::READ_REGISTER_ACK, packet_id, &payload)
}

/// Build a `WRITE_REGISTER_ACK`. `writes_succeeded` is carried verbatim; the
/// engine always passes 1 here, preserving the source's optimistic-ack
/// behaviour even for a denied write (see `DESIGN.md`).
pub fn build_write_register_ack(packet_id: u16, writes_succeeded: u32) -> Bytes {
    let mut payload = BytesMut::with_capacity(4);
    payload.put_u32(writes_succeeded);
    build_ack(consts::WRITE_REGISTER_ACK, packet_id, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(packet_type: u8, command: u16, data_length: u16, packet_id: u16) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        buf.put_u8(packet_type);
        buf.put_u8(0);
        buf.put_u16(command);
        buf.put_u16(data_length);
        buf.put_u16(packet_id);
        buf
    }

    #[test]
    fn parse_discovery_command() {
        let buf = header_bytes(PACKET_TYPE_CMD, consts::DISCOVERY_COMMAND, 0, 0x0001);
        let (header, cmd) = parse_command(&buf).unwrap().unwrap();
        assert_eq!(header.packet_id, 0x0001);
        assert_eq!(cmd, Command::Discovery);
    }

    #[test]
    fn parse_write_register_command() {
        let mut buf = header_bytes(PACKET_TYPE_CMD, consts::WRITE_REGISTER_CMD, 8, 7);
        buf.put_u32(0x0000_0A00);
        buf.put_u32(2);
        let (_, cmd) = parse_command(&buf).unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::WriteRegister {
                address: 0x0000_0A00,
                value: 2
            }
        );
    }

    #[test]
    fn unknown_command_is_dropped() {
        let buf = header_bytes(PACKET_TYPE_CMD, 0xFFFF, 0, 1);
        assert_eq!(parse_command(&buf).unwrap(), None);
    }

    #[test]
    fn non_command_packet_is_dropped() {
        let buf = header_bytes(PACKET_TYPE_ACK, consts::DISCOVERY_ACK, 0, 1);
        assert_eq!(parse_command(&buf).unwrap(), None);
    }

    #[test]
    fn rejects_packet_shorter_than_header() {
        let buf = [0u8; 4];
        assert_eq!(parse_command(&buf).unwrap_err(), CodecError::TooShort);
    }

    #[test]
    fn rejects_data_length_exceeding_datagram() {
        let buf = header_bytes(PACKET_TYPE_CMD, consts::READ_REGISTER_CMD, 100, 1);
        assert!(matches!(
            parse_command(&buf).unwrap_err(),
            CodecError::LengthMismatch { .. }
        ));
    }

    #[test]
    fn discovery_ack_roundtrip() {
        let descriptor = vec![0xAB; 248];
        let ack = build_discovery_ack(0x0001, &descriptor);
        let mut cursor = &ack[..];
        assert_eq!(cursor.get_u8(), PACKET_TYPE_ACK);
        let _flags = cursor.get_u8();
        assert_eq!(cursor.get_u16(), consts::DISCOVERY_ACK);
        assert_eq!(cursor.get_u16(), 248);
        assert_eq!(cursor.get_u16(), 0x0001);
        assert_eq!(cursor.remaining(), 248);
    }

    #[test]
    fn write_register_ack_preserves_succeeded_count() {
        let ack = build_write_register_ack(5, 1);
        let payload = &ack[HEADER_SIZE..];
        assert_eq!(u32::from_be_bytes(payload.try_into().unwrap()), 1);
    }
}
