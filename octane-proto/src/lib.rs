//! Sans-I/O core of a QUIC-inspired reliable, multi-stream, encrypted transport over UDP.
//!
//! This crate owns the packet-number and reliability bookkeeping, the AIMD congestion
//! controller, the connection and per-stream state machines, the security manager (nonce
//! sequencing, replay window, key rotation), the stream-multiplexing and delivery buffers, and
//! the wire packet format with coalescing. It performs no I/O and pulls in no async runtime: a
//! driver (see the `octane` crate) feeds it datagrams and timer fires and drains outbound
//! datagrams, exactly the split quinn-proto draws between itself and `quinn`.
//!
//! Out of scope, by design (treated as opaque collaborators, see [`security::Aead`] and
//! [`security::KeyExchange`]): the UDP socket itself, the AEAD/ECDH primitives' actual
//! cryptography, and the application-level typed-message codec.

pub mod coalesce;
pub mod config;
pub mod congestion;
pub mod connection;
pub mod connection_state;
pub mod error;
pub mod frame;
pub mod migration;
pub mod packet;
pub mod reliability;
pub mod security;
pub mod stream;
pub mod stream_state;

pub use config::{ConfigError as TransportConfigError, SecurityConfig, TransportConfig};
pub use connection::{Connection, Deadline, Side, Stats};
pub use error::{CodecError, ConfigError, ConnectionError};
pub use frame::Frame;
pub use packet::Packet;
pub use security::{Aead, AuthError, KeyExchange};
pub use stream::{StreamError, WEIGHT_CONTROL, WEIGHT_DEFAULT, WEIGHT_HIGH, WEIGHT_LOW};
