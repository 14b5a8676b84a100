//! Async convenience wrapper around `octane-proto`, architecturally identical to quinn's own
//! split between `quinn-proto` (sans-I/O) and `quinn` (the async runtime glue): a UDP socket, a
//! background driver task, and typed per-stream send/receive handles.
//!
//! Supplies the collaborators `octane-proto` leaves opaque (§6): [`crypto::ChaChaAead`] and
//! [`crypto::X25519KeyExchange`] for the AEAD and key exchange, [`codec`] for the application
//! typed-message format, and [`udp::DatagramSocket`] for the socket itself.

pub mod codec;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod stream;
pub mod udp;

pub use connection::{connect, Connection};
pub use error::{ConnectError, ReadError, WriteError};
pub use octane_proto::{Side, Stats, TransportConfig};
pub use stream::{RecvStream, SendStream};
