use thiserror::Error;

/// Errors surfaced to the application, per the error taxonomy.
///
/// Wire-level rejections (bad auth tags, replay, unknown versions, unvalidated source addresses,
/// ACKs for unallocated packet numbers) never produce one of these; they are handled silently
/// inside the engine and only show up in `tracing` output and stats counters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionError {
    /// The connection or stream is terminal.
    #[error("connection closed")]
    ConnectionClosed,
    /// The cryptographic handshake did not complete.
    #[error("handshake failed")]
    HandshakeFailed,
    /// An operation exceeded its deadline.
    #[error("timed out")]
    Timeout,
    /// A wrapped system/network failure.
    #[error("underlying error: {0}")]
    Underlying(String),
}

/// Errors from encoding or decoding an application-level typed value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecError {
    #[error("failed to encode value")]
    EncodingFailed,
    #[error("failed to decode value")]
    DecodingFailed,
}

/// Errors in the configuration of transport or security parameters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// Value exceeds supported bounds.
    #[error("value exceeds supported bounds")]
    OutOfBounds,
}

/// Packet codec failures (§4.1). Internal to the engine; never surfaced to the application.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer too small to contain a packet header")]
    BufferTooSmall,
    #[error("buffer shorter than the header's declared payload length")]
    Truncated,
    #[error("unsupported packet version")]
    UnknownVersion,
}
