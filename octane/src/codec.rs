//! The application-level typed-message codec (§6): turns a `Serialize`/`Deserialize` value into
//! the `Bytes` a [`crate::stream::SendStream`] hands to the engine, and back.

use bytes::Bytes;
use octane_proto::CodecError;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, CodecError> {
    bincode::serialize(value)
        .map(Bytes::from)
        .map_err(|_| CodecError::EncodingFailed)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    bincode::deserialize(bytes).map_err(|_| CodecError::DecodingFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
        label: String,
    }

    #[test]
    fn round_trips_a_struct() {
        let value = Ping {
            seq: 42,
            label: "hi".into(),
        };
        let bytes = encode(&value).unwrap();
        let decoded: Ping = decode(&bytes).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn decoding_garbage_is_a_codec_error() {
        let result: Result<Ping, _> = decode(&[0xff, 0x00, 0x11]);
        assert!(result.is_err());
    }
}
