//! Frame types carried inside a packet payload (§3).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::DecodeError;
use crate::reliability::AckRanges;

pub const FRAME_DATA: u8 = 0;
pub const FRAME_ACK: u8 = 1;
pub const FRAME_PING: u8 = 2;
pub const FRAME_PONG: u8 = 3;
pub const FRAME_RESET: u8 = 4;
pub const FRAME_HANDSHAKE: u8 = 5;

/// A decoded frame, the contents of one packet's plaintext payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(Bytes),
    Ack { largest_acked: u32, ranges: AckRanges },
    Ping,
    Pong,
    Reset,
    Handshake(Bytes),
}

impl Frame {
    pub fn type_byte(&self) -> u8 {
        match self {
            Frame::Data(_) => FRAME_DATA,
            Frame::Ack { .. } => FRAME_ACK,
            Frame::Ping => FRAME_PING,
            Frame::Pong => FRAME_PONG,
            Frame::Reset => FRAME_RESET,
            Frame::Handshake(_) => FRAME_HANDSHAKE,
        }
    }

    /// Encode this frame as `[type_byte | body]`, the exact bytes a packet payload carries.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(self.type_byte());
        match self {
            Frame::Data(bytes) | Frame::Handshake(bytes) => buf.put_slice(bytes),
            Frame::Ack {
                largest_acked,
                ranges,
            } => {
                buf.put_u32(*largest_acked);
                let ranges = ranges.as_slice();
                buf.put_u8(ranges.len() as u8);
                for (start, end) in ranges {
                    buf.put_u32(*start);
                    buf.put_u32(*end);
                }
            }
            Frame::Ping | Frame::Pong | Frame::Reset => {}
        }
        buf.freeze()
    }

    /// Decode a frame from a packet's plaintext payload.
    pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::BufferTooSmall);
        }
        let type_byte = bytes[0];
        let mut body = &bytes[1..];
        match type_byte {
            FRAME_DATA => Ok(Frame::Data(Bytes::copy_from_slice(body))),
            FRAME_HANDSHAKE => Ok(Frame::Handshake(Bytes::copy_from_slice(body))),
            FRAME_PING => Ok(Frame::Ping),
            FRAME_PONG => Ok(Frame::Pong),
            FRAME_RESET => Ok(Frame::Reset),
            FRAME_ACK => {
                if body.len() < 5 {
                    return Err(DecodeError::BufferTooSmall);
                }
                let largest_acked = body.get_u32();
                let range_count = body.get_u8() as usize;
                if body.len() < range_count * 8 {
                    return Err(DecodeError::Truncated);
                }
                let mut ranges = AckRanges::new();
                for _ in 0..range_count {
                    let start = body.get_u32();
                    let end = body.get_u32();
                    ranges.insert_range(start, end);
                }
                Ok(Frame::Ack {
                    largest_acked,
                    ranges,
                })
            }
            _ => Err(DecodeError::UnknownVersion),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_frame_round_trips() {
        let f = Frame::Data(Bytes::from_static(b"hello"));
        let encoded = f.encode();
        assert_eq!(Frame::decode(&encoded).unwrap(), f);
    }

    #[test]
    fn ack_frame_round_trips() {
        let mut ranges = AckRanges::new();
        ranges.insert_range(1, 3);
        ranges.insert_range(5, 6);
        let f = Frame::Ack {
            largest_acked: 6,
            ranges,
        };
        let encoded = f.encode();
        assert_eq!(Frame::decode(&encoded).unwrap(), f);
    }

    #[test]
    fn control_frames_round_trip() {
        for f in [Frame::Ping, Frame::Pong, Frame::Reset] {
            let encoded = f.encode();
            assert_eq!(Frame::decode(&encoded).unwrap(), f);
        }
    }
}
