//! Wire format serialization and deserialization.
//!
//! All multi-byte fields are little-endian, matching the BLE advertising
//! convention. Two frame families exist:
//!
//! - the JOIN_ME advertisement (flags TLV + manufacturer TLV), broadcast by
//!   the discovery beacon and parsed from GAP advertisement reports
//! - mesh packets (5-byte header + typed payload), exchanged over
//!   established links
//!
//! ## JOIN_ME v0 frame
//!
//! ```text
//! [ 0x02 0x01 0x06 ]                          flags TLV
//! [ 0x1B 0xFF                                 manufacturer TLV (27 value bytes)
//!   company_id(2) mesh_identifier(1) network_id(2) service_msg_type(1)
//!   sender(2) cluster_id(4) cluster_size(2 signed)
//!   free_in(1) free_out(1) battery_runtime(1) tx_power(1 signed)
//!   device_type(1) hops_to_sink(2 signed) mesh_write_handle(2)
//!   ack_field(4) ]
//! ```

use alloc::vec::Vec;

use crate::types::{
    ClusterInfoUpdate, ClusterSize, JoinMePayload, MessageType, NetworkId, NodeId, PacketHeader,
    ADV_COMPANY_ID, ADV_FLAGS_VALUE, ADV_MESH_IDENTIFIER, ADV_TYPE_FLAGS, ADV_TYPE_MANUFACTURER,
    SERVICE_MSG_JOIN_ME_V0,
};

/// Total length of an encoded JOIN_ME advertisement.
pub const JOIN_ME_PACKET_LEN: usize = 32;
/// Length byte of the manufacturer TLV (value bytes following the type).
const MANUFACTURER_VALUE_LEN: u8 = 27;
/// Length of the mesh packet header.
pub const PACKET_HEADER_LEN: usize = 5;

/// Decoding error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of buffer")]
    UnexpectedEof,
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("invalid field value")]
    InvalidField,
    #[error("not a JOIN_ME advertisement")]
    NotJoinMe,
}

/// Zero-copy reader over a byte slice.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Create a new reader over a byte slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Returns the number of bytes remaining.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        if self.pos >= self.buf.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    /// Read a fixed number of bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.pos + len > self.buf.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read a u16 in little-endian format.
    pub fn read_u16_le(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read an i16 in little-endian format.
    pub fn read_i16_le(&mut self) -> Result<i16, DecodeError> {
        Ok(self.read_u16_le()? as i16)
    }

    /// Read a u32 in little-endian format.
    pub fn read_u32_le(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read an i8.
    pub fn read_i8(&mut self) -> Result<i8, DecodeError> {
        Ok(self.read_u8()? as i8)
    }

    /// Read the rest of the buffer.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }
}

/// Writer for encoding frames.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Create a new empty writer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Returns the current length of written data.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if no data has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Write a slice of bytes.
    pub fn write_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// Write a u16 in little-endian format.
    pub fn write_u16_le(&mut self, v: u16) {
        self.write_bytes(&v.to_le_bytes());
    }

    /// Write an i16 in little-endian format.
    pub fn write_i16_le(&mut self, v: i16) {
        self.write_bytes(&v.to_le_bytes());
    }

    /// Write a u32 in little-endian format.
    pub fn write_u32_le(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    /// Write an i8.
    pub fn write_i8(&mut self, v: i8) {
        self.write_u8(v as u8);
    }

    /// Finish writing and return the buffer.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Encode a JOIN_ME v0 advertisement.
pub fn encode_join_me(network_id: NetworkId, payload: &JoinMePayload) -> Vec<u8> {
    let mut w = Writer::new();

    // Flags TLV
    w.write_u8(0x02);
    w.write_u8(ADV_TYPE_FLAGS);
    w.write_u8(ADV_FLAGS_VALUE);

    // Manufacturer TLV
    w.write_u8(MANUFACTURER_VALUE_LEN);
    w.write_u8(ADV_TYPE_MANUFACTURER);
    w.write_u16_le(ADV_COMPANY_ID);
    w.write_u8(ADV_MESH_IDENTIFIER);
    w.write_u16_le(network_id);
    w.write_u8(SERVICE_MSG_JOIN_ME_V0);

    w.write_u16_le(payload.sender);
    w.write_u32_le(payload.cluster_id);
    w.write_i16_le(payload.cluster_size);
    w.write_u8(payload.free_in);
    w.write_u8(payload.free_out);
    w.write_u8(payload.battery_runtime);
    w.write_i8(payload.tx_power);
    w.write_u8(payload.device_type as u8);
    w.write_i16_le(payload.hops_to_sink);
    w.write_u16_le(payload.mesh_write_handle);
    w.write_u32_le(payload.ack_field);

    debug_assert_eq!(w.len(), JOIN_ME_PACKET_LEN);
    w.finish()
}

/// Decode a JOIN_ME v0 advertisement.
///
/// Fails with [`DecodeError::NotJoinMe`] for advertisements that carry
/// other AD structures or foreign manufacturer data; those are ordinary
/// radio noise, not protocol errors.
pub fn decode_join_me(data: &[u8]) -> Result<(NetworkId, JoinMePayload), DecodeError> {
    if data.len() != JOIN_ME_PACKET_LEN {
        return Err(DecodeError::NotJoinMe);
    }
    let mut r = Reader::new(data);

    if r.read_u8()? != 0x02 || r.read_u8()? != ADV_TYPE_FLAGS || r.read_u8()? != ADV_FLAGS_VALUE {
        return Err(DecodeError::NotJoinMe);
    }
    if r.read_u8()? != MANUFACTURER_VALUE_LEN || r.read_u8()? != ADV_TYPE_MANUFACTURER {
        return Err(DecodeError::NotJoinMe);
    }
    if r.read_u16_le()? != ADV_COMPANY_ID || r.read_u8()? != ADV_MESH_IDENTIFIER {
        return Err(DecodeError::NotJoinMe);
    }
    let network_id = r.read_u16_le()?;
    if r.read_u8()? != SERVICE_MSG_JOIN_ME_V0 {
        return Err(DecodeError::NotJoinMe);
    }

    let payload = JoinMePayload {
        sender: r.read_u16_le()?,
        cluster_id: r.read_u32_le()?,
        cluster_size: r.read_i16_le()?,
        free_in: r.read_u8()?,
        free_out: r.read_u8()?,
        battery_runtime: r.read_u8()?,
        tx_power: r.read_i8()?,
        device_type: crate::types::DeviceType::from_u8(r.read_u8()?),
        hops_to_sink: r.read_i16_le()?,
        mesh_write_handle: r.read_u16_le()?,
        ack_field: r.read_u32_le()?,
    };

    Ok((network_id, payload))
}

/// First handshake packet: both sides exchange identity and cluster state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterHello {
    pub cluster_id: u32,
    pub cluster_size: ClusterSize,
    pub hops_to_sink: i16,
}

/// Second handshake packet, sent by the loser. The header's sender field
/// carries the loser's identity; the payload carries its sink distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterAck1 {
    pub hops_to_sink: i16,
}

/// Third handshake packet, sent by the winner: the final cluster identity
/// and the absolute unified size the loser must adopt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterAck2 {
    pub cluster_id: u32,
    pub cluster_size: ClusterSize,
    pub hops_to_sink: i16,
}

/// Module action request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMessage {
    pub module_id: u8,
    pub request_handle: u8,
    pub action_type: u8,
    pub payload: Vec<u8>,
}

/// Typed payload of a mesh packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshPayload {
    Hello(ClusterHello),
    Ack1(ClusterAck1),
    Ack2(ClusterAck2),
    InfoUpdate(ClusterInfoUpdate),
    Module(ModuleMessage),
}

impl MeshPayload {
    /// The message type tag this payload is framed with.
    pub fn message_type(&self, response: bool) -> MessageType {
        match self {
            MeshPayload::Hello(_) => MessageType::ClusterHello,
            MeshPayload::Ack1(_) => MessageType::ClusterAck1,
            MeshPayload::Ack2(_) => MessageType::ClusterAck2,
            MeshPayload::InfoUpdate(_) => MessageType::ClusterInfoUpdate,
            MeshPayload::Module(_) if response => MessageType::ModuleActionResponse,
            MeshPayload::Module(_) => MessageType::ModuleTriggerAction,
        }
    }
}

/// A complete mesh packet: header plus typed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshPacket {
    pub header: PacketHeader,
    pub payload: MeshPayload,
}

impl MeshPacket {
    /// Assemble a packet; the header's message type is derived from the
    /// payload variant.
    pub fn new(sender: NodeId, receiver: NodeId, payload: MeshPayload, response: bool) -> Self {
        let message_type = payload.message_type(response);
        Self {
            header: PacketHeader {
                message_type,
                sender,
                receiver,
            },
            payload,
        }
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u8(self.header.message_type as u8);
        w.write_u16_le(self.header.sender);
        w.write_u16_le(self.header.receiver);

        match &self.payload {
            MeshPayload::Hello(h) => {
                w.write_u32_le(h.cluster_id);
                w.write_i16_le(h.cluster_size);
                w.write_i16_le(h.hops_to_sink);
            }
            MeshPayload::Ack1(a) => {
                w.write_i16_le(a.hops_to_sink);
            }
            MeshPayload::Ack2(a) => {
                w.write_u32_le(a.cluster_id);
                w.write_i16_le(a.cluster_size);
                w.write_i16_le(a.hops_to_sink);
            }
            MeshPayload::InfoUpdate(u) => {
                w.write_i16_le(u.size_change);
                w.write_i16_le(u.hops_to_sink);
                w.write_u8(u.master_bit_handover as u8);
                w.write_u8(u.counter);
            }
            MeshPayload::Module(m) => {
                w.write_u8(m.module_id);
                w.write_u8(m.request_handle);
                w.write_u8(m.action_type);
                w.write_bytes(&m.payload);
            }
        }

        w.finish()
    }

    /// Decode from wire bytes.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        let message_type = MessageType::from_u8(r.read_u8()?)?;
        let sender = r.read_u16_le()?;
        let receiver = r.read_u16_le()?;

        let payload = match message_type {
            MessageType::ClusterHello => MeshPayload::Hello(ClusterHello {
                cluster_id: r.read_u32_le()?,
                cluster_size: r.read_i16_le()?,
                hops_to_sink: r.read_i16_le()?,
            }),
            MessageType::ClusterAck1 => MeshPayload::Ack1(ClusterAck1 {
                hops_to_sink: r.read_i16_le()?,
            }),
            MessageType::ClusterAck2 => MeshPayload::Ack2(ClusterAck2 {
                cluster_id: r.read_u32_le()?,
                cluster_size: r.read_i16_le()?,
                hops_to_sink: r.read_i16_le()?,
            }),
            MessageType::ClusterInfoUpdate => {
                let size_change = r.read_i16_le()?;
                let hops_to_sink = r.read_i16_le()?;
                let handover = r.read_u8()?;
                if handover > 1 {
                    return Err(DecodeError::InvalidField);
                }
                MeshPayload::InfoUpdate(ClusterInfoUpdate {
                    size_change,
                    hops_to_sink,
                    master_bit_handover: handover != 0,
                    counter: r.read_u8()?,
                })
            }
            MessageType::ModuleTriggerAction | MessageType::ModuleActionResponse => {
                MeshPayload::Module(ModuleMessage {
                    module_id: r.read_u8()?,
                    request_handle: r.read_u8()?,
                    action_type: r.read_u8()?,
                    payload: r.read_rest().to_vec(),
                })
            }
        };

        Ok(Self {
            header: PacketHeader {
                message_type,
                sender,
                receiver,
            },
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceType;

    fn sample_join_me() -> JoinMePayload {
        JoinMePayload {
            sender: 0x00A1,
            cluster_id: 0xDEAD_00A1,
            cluster_size: 7,
            free_in: 2,
            free_out: 1,
            battery_runtime: 80,
            tx_power: -4,
            device_type: DeviceType::Static,
            hops_to_sink: 3,
            mesh_write_handle: 0x0012,
            ack_field: 0,
        }
    }

    #[test]
    fn test_join_me_round_trip() {
        let payload = sample_join_me();
        let encoded = encode_join_me(0x0017, &payload);
        assert_eq!(encoded.len(), JOIN_ME_PACKET_LEN);

        let (network_id, decoded) = decode_join_me(&encoded).unwrap();
        assert_eq!(network_id, 0x0017);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_join_me_negative_fields_round_trip() {
        let mut payload = sample_join_me();
        payload.hops_to_sink = -1;
        payload.tx_power = -40;
        payload.cluster_size = -3;

        let encoded = encode_join_me(1, &payload);
        let (_, decoded) = decode_join_me(&encoded).unwrap();
        assert_eq!(decoded.hops_to_sink, -1);
        assert_eq!(decoded.tx_power, -40);
        assert_eq!(decoded.cluster_size, -3);
    }

    #[test]
    fn test_join_me_frame_layout() {
        let encoded = encode_join_me(0x1234, &sample_join_me());
        // Flags TLV
        assert_eq!(&encoded[..3], &[0x02, 0x01, 0x06]);
        // Manufacturer TLV: 27 value bytes after the type byte
        assert_eq!(encoded[3], 27);
        assert_eq!(encoded[4], 0xFF);
        // network id, little-endian
        assert_eq!(&encoded[8..10], &[0x34, 0x12]);
    }

    #[test]
    fn test_decode_join_me_rejects_foreign_frames() {
        let mut encoded = encode_join_me(1, &sample_join_me());
        encoded[4] = 0x09; // not manufacturer data
        assert_eq!(decode_join_me(&encoded), Err(DecodeError::NotJoinMe));

        assert_eq!(decode_join_me(&[0u8; 10]), Err(DecodeError::NotJoinMe));
    }

    #[test]
    fn test_mesh_packet_round_trip() {
        let packets = [
            MeshPacket::new(
                1,
                2,
                MeshPayload::Hello(ClusterHello {
                    cluster_id: 0xAABBCCDD,
                    cluster_size: 4,
                    hops_to_sink: -1,
                }),
                false,
            ),
            MeshPacket::new(2, 1, MeshPayload::Ack1(ClusterAck1 { hops_to_sink: 0 }), false),
            MeshPacket::new(
                1,
                2,
                MeshPayload::Ack2(ClusterAck2 {
                    cluster_id: 0xAABBCCDD,
                    cluster_size: 5,
                    hops_to_sink: 2,
                }),
                false,
            ),
            MeshPacket::new(
                1,
                2,
                MeshPayload::InfoUpdate(ClusterInfoUpdate {
                    size_change: -2,
                    hops_to_sink: 1,
                    master_bit_handover: true,
                    counter: 9,
                }),
                false,
            ),
            MeshPacket::new(
                1,
                0xFFFF,
                MeshPayload::Module(ModuleMessage {
                    module_id: 0,
                    request_handle: 3,
                    action_type: 4,
                    payload: alloc::vec![1, 2, 3],
                }),
                true,
            ),
        ];

        for packet in packets {
            let decoded = MeshPacket::decode(&packet.encode()).unwrap();
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn test_mesh_packet_decode_errors() {
        assert_eq!(
            MeshPacket::decode(&[0xEE, 0, 0, 0, 0]),
            Err(DecodeError::UnknownMessageType(0xEE))
        );
        // Truncated cluster update
        let short = [MessageType::ClusterInfoUpdate as u8, 1, 0, 2, 0, 1];
        assert_eq!(MeshPacket::decode(&short), Err(DecodeError::UnexpectedEof));
    }
}
