//! Wrapper-level errors: what an application sees from [`crate::stream::SendStream`] and
//! [`crate::stream::RecvStream`], and their conversions into [`std::io::Error`] (teacher's
//! `quinn/src/send_stream.rs` does the same `impl From<WriteError> for io::Error`).

use std::io;

use octane_proto::{CodecError, ConnectionError};
use thiserror::Error;

/// Errors that arise from writing to a stream.
#[derive(Debug, Error, Clone)]
pub enum WriteError {
    #[error("connection closed: {0}")]
    ConnectionClosed(#[source] ConnectionError),
    #[error("unknown stream")]
    UnknownStream,
    #[error("failed to encode value: {0}")]
    Codec(#[source] CodecError),
}

impl From<WriteError> for io::Error {
    fn from(e: WriteError) -> Self {
        let kind = match e {
            WriteError::ConnectionClosed(_) => io::ErrorKind::NotConnected,
            WriteError::UnknownStream => io::ErrorKind::NotConnected,
            WriteError::Codec(_) => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, e)
    }
}

/// Errors that arise from reading a stream.
#[derive(Debug, Error, Clone)]
pub enum ReadError {
    #[error("connection closed: {0}")]
    ConnectionClosed(#[source] ConnectionError),
    #[error("stream closed by peer")]
    StreamClosed,
    #[error("failed to decode value: {0}")]
    Codec(#[source] CodecError),
}

impl From<ReadError> for io::Error {
    fn from(e: ReadError) -> Self {
        let kind = match e {
            ReadError::ConnectionClosed(_) | ReadError::StreamClosed => {
                io::ErrorKind::NotConnected
            }
            ReadError::Codec(_) => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, e)
    }
}

/// Errors establishing a connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to bind UDP socket: {0}")]
    Bind(#[source] io::Error),
    #[error("handshake did not complete before the timeout")]
    HandshakeTimedOut,
    #[error("key exchange failed: {0}")]
    KeyExchange(String),
}
