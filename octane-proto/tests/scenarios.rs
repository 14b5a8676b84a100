//! End-to-end scenarios over the bare connection engine (§8), using a loopback pair of
//! `Connection`s and a trivial identity AEAD so the test doesn't need real cryptography.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use octane_proto::security::{Aead, AuthError};
use octane_proto::{Connection, Side, TransportConfig};

#[derive(Clone)]
struct IdentityAead;

impl Aead for IdentityAead {
    fn encrypt(&self, plaintext: &[u8], _nonce: u64) -> Vec<u8> {
        plaintext.to_vec()
    }
    fn decrypt(&self, ciphertext: &[u8], _nonce: u64) -> Result<Vec<u8>, AuthError> {
        Ok(ciphertext.to_vec())
    }
}

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

/// Drives a client/server pair through the handshake far enough for both sides to have an
/// installed key, returning them `Active`.
fn connected_pair(now: Instant) -> (Connection<IdentityAead>, Connection<IdentityAead>) {
    let client_addr = addr(1);
    let server_addr = addr(2);
    let mut client = Connection::new(Side::Client, server_addr, TransportConfig::default());
    let mut server = Connection::new(Side::Server, client_addr, TransportConfig::default());

    // Neither side listens/accepts (§1 Non-goals); both endpoints call `initiate` symmetrically
    // and each one's own handshake packet is what drives the other out of `synSent`.
    client.initiate([0xAA; 32], now);
    server.initiate([0xBB; 32], now);

    let (client_hello, dest) = client.poll_transmit().expect("client sent handshake");
    assert_eq!(dest, server_addr);
    let (server_hello, dest) = server.poll_transmit().expect("server sent handshake");
    assert_eq!(dest, client_addr);

    server.handle_datagram(&client_hello, client_addr, now);
    client.handle_datagram(&server_hello, server_addr, now);

    client.on_handshake_succeeded(IdentityAead, now);
    server.on_handshake_succeeded(IdentityAead, now);

    (client, server)
}

#[test]
fn single_message_round_trips() {
    let now = Instant::now();
    let (mut client, mut server) = connected_pair(now);

    let stream = client.open_stream().unwrap();
    client
        .send(stream, Bytes::from_static(&[0x01, 0x02, 0x03]), now)
        .unwrap();

    let (datagram, dest) = client.poll_transmit().expect("data packet queued");
    server.handle_datagram(&datagram, addr(1), now);

    let delivered = server.poll_deliver(stream).expect("payload delivered");
    assert_eq!(&delivered[..], &[0x01, 0x02, 0x03]);

    let stats = client.stats();
    assert!(stats.bytes_sent >= 4);
}

#[test]
fn five_messages_on_one_stream_arrive_in_order() {
    let now = Instant::now();
    let (mut client, mut server) = connected_pair(now);
    let stream = client.open_stream().unwrap();

    for msg in ["m1", "m2", "m3", "m4", "m5"] {
        client.send(stream, Bytes::from_static(msg.as_bytes()), now).unwrap();
        let (datagram, _) = client.poll_transmit().expect("data packet queued");
        server.handle_datagram(&datagram, addr(1), now);
    }

    let mut received = Vec::new();
    while let Some(bytes) = server.poll_deliver(stream) {
        received.push(String::from_utf8(bytes.to_vec()).unwrap());
    }
    assert_eq!(received, vec!["m1", "m2", "m3", "m4", "m5"]);
}

#[test]
fn stream_cap_is_enforced() {
    let now = Instant::now();
    let mut config = TransportConfig::default();
    config.max_streams_per_connection(1).unwrap();
    let mut client = Connection::new(Side::Client, addr(2), config);
    client.open_stream().unwrap();
    assert!(client.open_stream().is_err());
    let _ = now;
}

#[test]
fn migration_is_validated_against_original_and_current_address() {
    let now = Instant::now();
    let (mut client, mut server) = connected_pair(now);
    let stream = client.open_stream().unwrap();
    client.send(stream, Bytes::from_static(b"hi"), now).unwrap();
    let (datagram, _) = client.poll_transmit().unwrap();

    // a datagram from a wholly unrelated address is silently dropped.
    let stranger = addr(9999);
    server.handle_datagram(&datagram, stranger, now);
    assert!(server.poll_deliver(stream).is_none());

    // the real client address is still accepted afterward.
    server.handle_datagram(&datagram, addr(1), now);
    assert!(server.poll_deliver(stream).is_some());
}

#[test]
fn close_is_idempotent() {
    let now = Instant::now();
    let (mut client, _server) = connected_pair(now);
    client.close(now);
    client.close(now);
}

#[test]
fn acking_a_small_data_packet_grows_cwnd_by_its_actual_wire_length_not_the_full_mss() {
    let now = Instant::now();
    let (mut client, mut server) = connected_pair(now);
    let stream = client.open_stream().unwrap();
    let cwnd_before = client.stats().cwnd;

    client.send(stream, Bytes::from_static(b"hi"), now).unwrap();
    let (datagram, _) = client.poll_transmit().expect("data packet queued");
    server.handle_datagram(&datagram, addr(1), now);
    let (ack_datagram, _) = server.poll_transmit().expect("ack queued");
    client.handle_datagram(&ack_datagram, addr(2), now);

    assert_eq!(client.stats().packets_acked, 1);
    // slow-start grows cwnd by exactly the acked wire length; a "hi" data frame is a handful of
    // bytes, nowhere near the 1460-byte MSS a fixed-credit-per-ack bug would have added instead.
    let growth = client.stats().cwnd - cwnd_before;
    assert!(growth > 0 && growth < 100, "unexpected cwnd growth: {growth}");
}

#[test]
fn acks_never_enter_in_flight_bookkeeping_and_never_trigger_a_retransmission_timeout() {
    let now = Instant::now();
    let (mut client, mut server) = connected_pair(now);
    let stream = client.open_stream().unwrap();

    client.send(stream, Bytes::from_static(b"hi"), now).unwrap();
    let (datagram, _) = client.poll_transmit().expect("data packet queued");
    server.handle_datagram(&datagram, addr(1), now);
    server.poll_transmit().expect("ack queued"); // drain the ack itself off the queue

    // the server only ever sent an (non-ack-eliciting) ACK back; it must have nothing in flight
    // and so no retransmission deadline, however long we wait.
    assert!(server.poll_timeout().is_none());

    let far_future = now + Duration::from_secs(3600);
    server.handle_timeout(octane_proto::Deadline::Retransmission, far_future);
    assert!(server.poll_transmit().is_none());
}
