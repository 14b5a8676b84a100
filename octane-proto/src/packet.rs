//! Fixed 16-byte packet header + ciphertext payload (§3, §4.1).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::DecodeError;

/// Wire version this implementation speaks. Any other value is `UnknownVersion`.
pub const VERSION: u8 = 1;

/// Size of the fixed header, in bytes.
pub const HEADER_LEN: usize = 16;

/// Packet-level flag bit set on the packet carrying the handshake's initial payload. The
/// remainder of the flags byte is reserved.
pub const FLAG_HANDSHAKE: u8 = 0b0000_0001;

/// A decoded (but still encrypted) packet: fixed header plus opaque ciphertext payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub version: u8,
    pub flags: u8,
    pub connection_id: u32,
    pub packet_number: u32,
    pub stream_id: u32,
    pub payload: Bytes,
}

impl Packet {
    /// Construct a packet destined for `stream_id` carrying `payload`.
    ///
    /// `stream_id` must be 0 for ACK/control frames (I10); the caller is responsible for that
    /// invariant since this type has no notion of frame contents.
    pub fn new(connection_id: u32, packet_number: u32, stream_id: u32, payload: Bytes) -> Self {
        Packet {
            version: VERSION,
            flags: 0,
            connection_id,
            packet_number,
            stream_id,
            payload,
        }
    }

    /// Total encoded size in bytes: header plus payload.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Serialize the header followed by the payload.
    ///
    /// Panics if `payload.len()` does not fit in a `u16`; callers are expected to keep packets
    /// within `coalesce_mtu_bytes`, which is always far smaller than `u16::MAX`.
    pub fn encode(&self) -> Bytes {
        let payload_len: u16 = self
            .payload
            .len()
            .try_into()
            .expect("packet payload must fit in u16::MAX bytes");
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.version);
        buf.put_u8(self.flags);
        buf.put_u32(self.connection_id);
        buf.put_u32(self.packet_number);
        buf.put_u32(self.stream_id);
        buf.put_u16(payload_len);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decode one packet from the front of `bytes`, returning the packet and the number of bytes
    /// consumed. Trailing bytes beyond `16 + payload_len` are left untouched so the caller can
    /// continue parsing a coalesced datagram (§4.2).
    pub fn decode(bytes: &[u8]) -> Result<(Packet, usize), DecodeError> {
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::BufferTooSmall);
        }
        let mut cursor = bytes;
        let version = cursor.get_u8();
        let flags = cursor.get_u8();
        let connection_id = cursor.get_u32();
        let packet_number = cursor.get_u32();
        let stream_id = cursor.get_u32();
        let payload_len = cursor.get_u16() as usize;

        if version != VERSION {
            return Err(DecodeError::UnknownVersion);
        }
        if bytes.len() < HEADER_LEN + payload_len {
            return Err(DecodeError::Truncated);
        }
        let payload = Bytes::copy_from_slice(&bytes[HEADER_LEN..HEADER_LEN + payload_len]);
        Ok((
            Packet {
                version,
                flags,
                connection_id,
                packet_number,
                stream_id,
                payload,
            },
            HEADER_LEN + payload_len,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(payload_len: usize) -> Packet {
        Packet::new(42, 7, 3, Bytes::from(vec![0xAB; payload_len]))
    }

    #[test]
    fn round_trip_empty_payload() {
        let p = sample(0);
        let encoded = p.encode();
        let (decoded, consumed) = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded, p);
        assert_eq!(consumed, HEADER_LEN);
    }

    #[test]
    fn round_trip_max_payload() {
        let p = sample(65535);
        let encoded = p.encode();
        let (decoded, consumed) = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded, p);
        assert_eq!(consumed, HEADER_LEN + 65535);
    }

    #[test]
    fn decode_buffer_too_small() {
        let bytes = vec![0u8; 15];
        assert_eq!(Packet::decode(&bytes), Err(DecodeError::BufferTooSmall));
    }

    #[test]
    fn decode_truncated() {
        // 16-byte header claiming payload_len = 100, but no payload bytes follow.
        let mut buf = BytesMut::new();
        buf.put_u8(VERSION);
        buf.put_u8(0);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u16(100);
        assert_eq!(Packet::decode(&buf), Err(DecodeError::Truncated));
    }

    #[test]
    fn decode_unknown_version_is_distinct_from_truncated() {
        let mut buf = BytesMut::new();
        buf.put_u8(99);
        buf.put_u8(0);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u16(0);
        assert_eq!(Packet::decode(&buf), Err(DecodeError::UnknownVersion));
    }

    #[test]
    fn trailing_bytes_are_not_consumed() {
        let p = sample(3);
        let mut encoded = BytesMut::from(&p.encode()[..]);
        encoded.put_slice(&[1, 2, 3, 4]);
        let (decoded, consumed) = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded, p);
        assert_eq!(consumed, HEADER_LEN + 3);
        assert_eq!(&encoded[consumed..], &[1, 2, 3, 4]);
    }
}
