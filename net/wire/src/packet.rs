//! Packet model: the unit of application-level communication.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::PROTOCOL_VERSION;

/// Packet routing tag.
///
/// Tags 0..=5 are built in; every further interceptor-registered tag travels
/// as [`PacketType::Extension`]. Conversion from a raw byte never fails:
/// unknown tags are routed to the fallback handler rather than rejected, so
/// a newer peer can speak to an older one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketType {
    /// UTF-8 text payload
    Text,
    /// Opaque binary payload
    Binary,
    /// Application-level ping
    Ping,
    /// Application-level pong
    Pong,
    /// Liveness packet, handled inside the session and never dispatched
    Heartbeat,
    /// JSON-encoded structured payload
    Json,
    /// Interceptor-registered extension tag.
    ///
    /// Tags 0..=5 belong to the built-in variants; `Extension` carrying one
    /// of them encodes to the same byte and decodes back as the built-in, so
    /// extension tags must start at 6. [`PacketType::from_u8`] never
    /// produces an aliased `Extension`.
    Extension(u8),
}

impl PacketType {
    /// Wire representation of this tag.
    pub fn as_u8(self) -> u8 {
        match self {
            PacketType::Text => 0,
            PacketType::Binary => 1,
            PacketType::Ping => 2,
            PacketType::Pong => 3,
            PacketType::Heartbeat => 4,
            PacketType::Json => 5,
            PacketType::Extension(tag) => tag,
        }
    }

    /// Decode a tag from its wire representation.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => PacketType::Text,
            1 => PacketType::Binary,
            2 => PacketType::Ping,
            3 => PacketType::Pong,
            4 => PacketType::Heartbeat,
            5 => PacketType::Json,
            tag => PacketType::Extension(tag),
        }
    }
}

/// A framed message.
///
/// `sequence` is caller-assigned and carried verbatim; the framework attaches
/// no ordering or acknowledgment semantics to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Protocol revision; peers reject anything but [`PROTOCOL_VERSION`]
    pub version: u8,
    /// Routing tag
    pub packet_type: PacketType,
    /// Caller-assigned correlation number
    pub sequence: u32,
    /// Opaque payload bytes
    pub payload: Bytes,
}

impl Packet {
    /// Create a packet with the current protocol version.
    pub fn new(packet_type: PacketType, sequence: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            packet_type,
            sequence,
            payload: payload.into(),
        }
    }

    /// Create a TEXT packet.
    pub fn text(sequence: u32, text: impl Into<String>) -> Self {
        Self::new(PacketType::Text, sequence, text.into().into_bytes())
    }

    /// Create a BINARY packet.
    pub fn binary(sequence: u32, payload: impl Into<Bytes>) -> Self {
        Self::new(PacketType::Binary, sequence, payload)
    }

    /// Create an empty HEARTBEAT packet.
    pub fn heartbeat() -> Self {
        Self::new(PacketType::Heartbeat, 0, Bytes::new())
    }

    /// Encode this packet into its wire representation.
    pub fn encode(&self, max_payload: usize) -> Result<Bytes, crate::error::WireError> {
        crate::codec::encode_packet(self, max_payload)
    }

    /// The total wire size of this packet (header + payload).
    pub fn wire_size(&self) -> usize {
        crate::codec::HEADER_SIZE + self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag_roundtrip() {
        for tag in 0u8..=255 {
            assert_eq!(PacketType::from_u8(tag).as_u8(), tag);
        }
    }

    #[test]
    fn test_known_tags() {
        assert_eq!(PacketType::from_u8(0), PacketType::Text);
        assert_eq!(PacketType::from_u8(4), PacketType::Heartbeat);
        assert_eq!(PacketType::from_u8(5), PacketType::Json);
        assert_eq!(PacketType::from_u8(9), PacketType::Extension(9));
    }

    #[test]
    fn test_aliased_extension_decodes_as_builtin() {
        // Extension tags below 6 collide with the built-in variants on the
        // wire; the decoder normalizes them to the built-in.
        for tag in 0u8..=5 {
            let aliased = PacketType::Extension(tag);
            assert_eq!(PacketType::from_u8(aliased.as_u8()), PacketType::from_u8(tag));
            assert!(!matches!(
                PacketType::from_u8(aliased.as_u8()),
                PacketType::Extension(_)
            ));
        }
        assert_eq!(PacketType::from_u8(PacketType::Extension(3).as_u8()), PacketType::Pong);
    }

    #[test]
    fn test_packet_wire_size() {
        let packet = Packet::text(1, "ping");
        assert_eq!(packet.wire_size(), crate::codec::HEADER_SIZE + 4);
        assert_eq!(packet.version, PROTOCOL_VERSION);
    }

    #[test]
    fn test_heartbeat_is_empty() {
        let hb = Packet::heartbeat();
        assert_eq!(hb.packet_type, PacketType::Heartbeat);
        assert!(hb.payload.is_empty());
        assert_eq!(hb.sequence, 0);
    }
}
