//! The UDP collaborator (§6): binds a socket and ferries datagrams in and out. Abstracted behind
//! [`DatagramSocket`] so the driver can be tested against something other than a real socket.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use socket2::{Domain, Socket, Type};
use tokio::net::UdpSocket;

/// What [`crate::connection::ConnectionRef`]'s driver needs from a socket: send a datagram to an
/// address, receive one from whoever sent it.
#[async_trait]
pub trait DatagramSocket: Send + Sync {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl DatagramSocket for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

/// Binds a UDP socket at `addr` with the given send/receive buffer sizes, the way `perf`'s own
/// `bind_socket` sizes its sockets for high-throughput transfer before handing them to tokio.
pub fn bind_socket(
    addr: SocketAddr,
    send_buffer_size: usize,
    recv_buffer_size: usize,
) -> io::Result<UdpSocket> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::DGRAM, None)?;
    if addr.is_ipv6() {
        socket.set_only_v6(false).ok();
    }
    socket.set_send_buffer_size(send_buffer_size)?;
    socket.set_recv_buffer_size(recv_buffer_size)?;
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

/// Reads one datagram off `socket` into a freshly allocated buffer sized to the coalescing MTU.
pub async fn recv_datagram(
    socket: &dyn DatagramSocket,
    mtu: usize,
) -> io::Result<(Bytes, SocketAddr)> {
    let mut buf = vec![0u8; mtu];
    let (len, source) = socket.recv_from(&mut buf).await?;
    buf.truncate(len);
    Ok((Bytes::from(buf), source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bound_socket_reports_its_local_addr() {
        let socket = bind_socket("127.0.0.1:0".parse().unwrap(), 1 << 16, 1 << 16).unwrap();
        let addr = DatagramSocket::local_addr(&socket).unwrap();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
    }

    #[tokio::test]
    async fn send_then_recv_round_trips_a_datagram() {
        let a = bind_socket("127.0.0.1:0".parse().unwrap(), 1 << 16, 1 << 16).unwrap();
        let b = bind_socket("127.0.0.1:0".parse().unwrap(), 1 << 16, 1 << 16).unwrap();
        let b_addr = DatagramSocket::local_addr(&b).unwrap();

        DatagramSocket::send_to(&a, b"hello", b_addr).await.unwrap();
        let (datagram, _) = recv_datagram(&b, 1472).await.unwrap();
        assert_eq!(&datagram[..], b"hello");
    }
}
