//! Packs multiple encoded packets into MTU-sized datagrams; splits a datagram back apart (§4.2).

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::DecodeError;
use crate::packet::Packet;

/// Greedily appends encoded packets into the current datagram while its total size stays within
/// `max_payload`; flushes and starts a new datagram otherwise. Input order is preserved both
/// within and across datagrams.
pub fn coalesce(packets: &[Packet], max_payload: usize) -> Vec<Bytes> {
    let mut datagrams = Vec::new();
    let mut current = BytesMut::new();

    for packet in packets {
        let encoded = packet.encode();
        if !current.is_empty() && current.len() + encoded.len() > max_payload {
            datagrams.push(current.split().freeze());
        }
        current.put_slice(&encoded);
    }
    if !current.is_empty() {
        datagrams.push(current.freeze());
    }
    datagrams
}

/// Repeatedly decodes a packet from `datagram`, consuming exactly `16 + payload_len` bytes each
/// time, until the buffer is exhausted. Any trailing partial bytes yield `Truncated`.
pub fn split(datagram: &[u8]) -> Result<Vec<Packet>, DecodeError> {
    let mut packets = Vec::new();
    let mut offset = 0;
    while offset < datagram.len() {
        let (packet, consumed) = Packet::decode(&datagram[offset..])?;
        packets.push(packet);
        offset += consumed;
    }
    Ok(packets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(n: u32, payload_len: usize) -> Packet {
        Packet::new(1, n, 0, Bytes::from(vec![0x11; payload_len]))
    }

    #[test]
    fn split_coalesce_round_trip_when_each_packet_fits_mtu() {
        let packets = vec![packet(0, 10), packet(1, 20), packet(2, 30)];
        let datagrams = coalesce(&packets, 1472);
        assert_eq!(datagrams.len(), 1);
        let recovered: Vec<Packet> = datagrams
            .iter()
            .flat_map(|d| split(d).unwrap())
            .collect();
        assert_eq!(recovered, packets);
    }

    #[test]
    fn coalesce_flushes_when_mtu_exceeded() {
        let packets = vec![packet(0, 1000), packet(1, 1000), packet(2, 1000)];
        let datagrams = coalesce(&packets, 1472);
        assert_eq!(datagrams.len(), 3);
        for d in &datagrams {
            assert!(d.len() <= 1472);
        }
        let recovered: Vec<Packet> = datagrams
            .iter()
            .flat_map(|d| split(d).unwrap())
            .collect();
        assert_eq!(recovered, packets);
    }

    #[test]
    fn split_rejects_trailing_partial_bytes() {
        let mut encoded = BytesMut::from(&packet(0, 5).encode()[..]);
        encoded.put_slice(&[1, 2, 3]); // partial trailing header
        assert!(split(&encoded).is_err());
    }

    #[test]
    fn order_preserved_across_multiple_datagrams() {
        let packets: Vec<Packet> = (0..5).map(|i| packet(i, 700)).collect();
        let datagrams = coalesce(&packets, 1472);
        let recovered: Vec<Packet> = datagrams
            .iter()
            .flat_map(|d| split(d).unwrap())
            .collect();
        assert_eq!(recovered, packets);
    }
}
