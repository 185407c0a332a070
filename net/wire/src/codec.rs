//! Packet encoding and the incremental frame decoder.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;
use crate::packet::{Packet, PacketType};

/// Wire protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Packet header size: version (1) + type (1) + payload_len (4) + sequence (4).
pub const HEADER_SIZE: usize = 10;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Encode a packet into its wire representation.
///
/// Fields are written one by one in big-endian order; the host's in-memory
/// layout never reaches the wire.
pub fn encode_packet(packet: &Packet, max_payload: usize) -> Result<Bytes, WireError> {
    if packet.payload.len() > max_payload {
        return Err(WireError::PayloadTooLarge {
            size: packet.payload.len(),
            max: max_payload,
        });
    }

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + packet.payload.len());
    buf.put_u8(packet.version);
    buf.put_u8(packet.packet_type.as_u8());
    buf.put_u32(packet.payload.len() as u32);
    buf.put_u32(packet.sequence);
    buf.put_slice(&packet.payload);

    Ok(buf.freeze())
}

/// Incremental decoder for a stream of packets.
///
/// Feed the accumulated read buffer to [`PacketDecoder::decode`] after every
/// socket read; it consumes exactly one complete frame per call and leaves
/// partial frames buffered for the next round.
#[derive(Debug)]
pub struct PacketDecoder {
    max_payload: usize,
}

impl PacketDecoder {
    /// Create a decoder with the default payload limit.
    pub fn new() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Create a decoder with an explicit payload limit.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self { max_payload }
    }

    /// Decode one packet from the buffer.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a complete frame;
    /// the buffered bytes are left untouched. A version mismatch or an
    /// oversized declared length is fatal for the stream: the caller must
    /// drop the connection, there is no mid-stream resynchronization.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, WireError> {
        if src.len() < HEADER_SIZE {
            return Ok(None); // Need more data
        }

        let version = src[0];
        if version != PROTOCOL_VERSION {
            return Err(WireError::Version(version));
        }

        let packet_type = PacketType::from_u8(src[1]);
        let payload_len = u32::from_be_bytes([src[2], src[3], src[4], src[5]]) as usize;
        let sequence = u32::from_be_bytes([src[6], src[7], src[8], src[9]]);

        if payload_len > self.max_payload {
            return Err(WireError::PayloadTooLarge {
                size: payload_len,
                max: self.max_payload,
            });
        }

        if src.len() < HEADER_SIZE + payload_len {
            return Ok(None); // Need more data
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(payload_len).freeze();

        Ok(Some(Packet {
            version,
            packet_type,
            sequence,
            payload,
        }))
    }
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let packet = Packet::new(PacketType::Text, 7, &b"ping"[..]);
        let mut buf = BytesMut::from(encode_packet(&packet, DEFAULT_MAX_PAYLOAD).unwrap().as_ref());

        assert_eq!(buf.len(), HEADER_SIZE + 4);

        let decoded = PacketDecoder::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, packet);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_header_layout_is_big_endian() {
        let packet = Packet::new(PacketType::Binary, 0x0102_0304, &b"ab"[..]);
        let bytes = encode_packet(&packet, DEFAULT_MAX_PAYLOAD).unwrap();

        assert_eq!(bytes[0], PROTOCOL_VERSION);
        assert_eq!(bytes[1], 1); // BINARY
        assert_eq!(&bytes[2..6], &[0, 0, 0, 2]); // payload_len
        assert_eq!(&bytes[6..10], &[1, 2, 3, 4]); // sequence
        assert_eq!(&bytes[10..], b"ab");
    }

    #[test]
    fn test_decode_incomplete_header() {
        let mut buf = BytesMut::from(&[PROTOCOL_VERSION, 0, 0][..]);
        let result = PacketDecoder::new().decode(&mut buf).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), 3); // untouched
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let packet = Packet::text(1, "hello");
        let bytes = encode_packet(&packet, DEFAULT_MAX_PAYLOAD).unwrap();
        let mut buf = BytesMut::from(&bytes[..HEADER_SIZE + 2]);

        let result = PacketDecoder::new().decode(&mut buf).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_declared_length_beyond_buffer_needs_more_data() {
        // Header declares 1000 payload bytes but only 10 follow.
        let mut buf = BytesMut::new();
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(1);
        buf.put_u32(1000);
        buf.put_u32(42);
        buf.put_slice(&[0u8; 10]);

        let result = PacketDecoder::new().decode(&mut buf).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), HEADER_SIZE + 10);
    }

    #[test]
    fn test_decode_version_mismatch() {
        let mut buf = BytesMut::from(&[99u8, 0, 0, 0, 0, 0, 0, 0, 0, 0][..]);
        let result = PacketDecoder::new().decode(&mut buf);
        assert!(matches!(result, Err(WireError::Version(99))));
    }

    #[test]
    fn test_decode_payload_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(0);
        buf.put_u32(64);
        buf.put_u32(0);

        let result = PacketDecoder::with_max_payload(16).decode(&mut buf);
        assert!(matches!(result, Err(WireError::PayloadTooLarge { size: 64, max: 16 })));
    }

    #[test]
    fn test_encode_payload_too_large() {
        let packet = Packet::binary(0, vec![0u8; 32]);
        let result = encode_packet(&packet, 16);
        assert!(matches!(result, Err(WireError::PayloadTooLarge { size: 32, max: 16 })));
    }

    #[test]
    fn test_multiple_packets_decode_in_order() {
        let mut buf = BytesMut::new();
        buf.put_slice(&encode_packet(&Packet::text(1, "first"), DEFAULT_MAX_PAYLOAD).unwrap());
        buf.put_slice(&encode_packet(&Packet::text(2, "second"), DEFAULT_MAX_PAYLOAD).unwrap());

        let mut decoder = PacketDecoder::new();
        let p1 = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(p1.sequence, 1);
        assert_eq!(p1.payload.as_ref(), b"first");

        let p2 = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(p2.sequence, 2);
        assert_eq!(p2.payload.as_ref(), b"second");

        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_payload() {
        let mut buf =
            BytesMut::from(encode_packet(&Packet::heartbeat(), DEFAULT_MAX_PAYLOAD).unwrap().as_ref());
        let packet = PacketDecoder::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.packet_type, PacketType::Heartbeat);
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn test_fragmented_decode() {
        let packet = Packet::text(3, "fragmented across reads");
        let bytes = encode_packet(&packet, DEFAULT_MAX_PAYLOAD).unwrap();

        // Feed the frame one byte at a time; exactly one packet must emerge.
        let mut decoder = PacketDecoder::new();
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for b in bytes.iter() {
            buf.put_u8(*b);
            if let Some(p) = decoder.decode(&mut buf).unwrap() {
                decoded.push(p);
            }
        }

        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0], packet);
    }
}
