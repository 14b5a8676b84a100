//! The connection driver: owns the UDP socket and the sans-I/O [`octane_proto::Connection`], and
//! pumps datagrams and timers between them. Mirrors quinn's `ConnectionRef`/driver split and its
//! `conn.lock("site")` diagnostic pattern (`quinn/src/send_stream.rs`'s call sites), generalized
//! from quinn's TLS-driven handshake to the symmetric connect-only model here (§1 Non-goals: no
//! listen/accept demultiplexing) and to ECDH key derivation instead of a TLS session.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::Waker;
use std::time::Instant;

use octane_proto::connection_state::ConnState;
use octane_proto::{Connection as ProtoConnection, Side, TransportConfig};
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::crypto::{ChaChaAead, X25519KeyExchange};
use crate::error::ConnectError;
use crate::stream::{RecvStream, SendStream};
use crate::udp::{bind_socket, recv_datagram, DatagramSocket};

/// State shared between the driver task and every [`SendStream`]/[`RecvStream`] handle.
pub(crate) struct ConnectionInner {
    pub(crate) inner: ProtoConnection<ChaChaAead>,
    pub(crate) blocked_readers: HashMap<u32, Vec<Waker>>,
}

impl ConnectionInner {
    fn wake_all_readers(&mut self) {
        for (_, wakers) in self.blocked_readers.drain() {
            for waker in wakers {
                waker.wake();
            }
        }
    }
}

/// A cloneable handle to one connection's shared state plus the knob that nudges the driver to
/// wake up and flush outbound data immediately instead of waiting for its next timer tick.
#[derive(Clone)]
pub struct ConnectionRef {
    state: Arc<Mutex<ConnectionInner>>,
    notify: Arc<Notify>,
}

impl ConnectionRef {
    /// Locks the shared connection state. `site` is a short label identifying the call site,
    /// surfaced in `tracing` output if the lock is ever found contended; purely diagnostic.
    pub(crate) fn lock(&self, site: &'static str) -> MutexGuard<'_, ConnectionInner> {
        trace!(site, "locking connection state");
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn notify_driver(&self) {
        self.notify.notify_one();
    }

    pub fn stats(&self) -> octane_proto::Stats {
        self.lock("ConnectionRef::stats").inner.stats()
    }
}

/// A connected endpoint: the handshake has been kicked off and the background driver task is
/// running.
pub struct Connection {
    conn: ConnectionRef,
}

impl Connection {
    fn from_ref(conn: ConnectionRef) -> Self {
        Connection { conn }
    }

    /// Opens a new application stream (§4.8), returning a send and a receive half. There is one
    /// shared stream-ID space, not quinn's separate bidi/uni spaces, since the wire format has
    /// just one `streamID` field (§3).
    pub fn open_stream(&self) -> Result<(SendStream, RecvStream), ConnectError> {
        let stream_id = {
            let mut guard = self.conn.lock("Connection::open_stream");
            guard
                .inner
                .open_stream()
                .map_err(|_| ConnectError::KeyExchange("stream cap exceeded".into()))?
        };
        Ok((
            SendStream::new(self.conn.clone(), stream_id),
            RecvStream::new(self.conn.clone(), stream_id),
        ))
    }

    pub fn stats(&self) -> octane_proto::Stats {
        self.conn.stats()
    }

    pub fn close(&self) {
        let mut guard = self.conn.lock("Connection::close");
        guard.inner.close(Instant::now());
        drop(guard);
        self.conn.notify_driver();
    }
}

/// Binds a socket, kicks off the handshake against `peer`, and spawns the background driver task.
/// Both endpoints of a connection call this the same way (§1 Non-goals: no listen/accept split).
pub async fn connect(
    bind_addr: SocketAddr,
    peer: SocketAddr,
    side: Side,
    config: TransportConfig,
) -> Result<Connection, ConnectError> {
    let socket = bind_socket(bind_addr, 1 << 21, 1 << 21).map_err(ConnectError::Bind)?;
    let socket: Arc<dyn DatagramSocket> = Arc::new(socket);

    let (exchange, public_value) = X25519KeyExchange::generate();
    let mut proto = ProtoConnection::new(side, peer, config);
    proto.initiate(public_value, Instant::now());

    let state = Arc::new(Mutex::new(ConnectionInner {
        inner: proto,
        blocked_readers: HashMap::new(),
    }));
    let conn_ref = ConnectionRef {
        state,
        notify: Arc::new(Notify::new()),
    };

    tokio::spawn(drive(socket, conn_ref.clone(), exchange));

    Ok(Connection::from_ref(conn_ref))
}

/// The driver loop: waits on whichever of "a datagram arrived", "someone nudged us to flush", or
/// "a timer fired" happens first, feeds the engine, derives the session key off the peer's
/// handshake payload once it's available, and drains the outbound queue to the socket.
async fn drive(socket: Arc<dyn DatagramSocket>, conn: ConnectionRef, key_exchange: X25519KeyExchange) {
    let mut key_exchange = Some(key_exchange);
    const MTU: usize = 1472;

    loop {
        let deadline = conn.lock("driver::poll_timeout").inner.poll_timeout().map(|(_, at)| at);

        tokio::select! {
            result = recv_datagram(&*socket, MTU) => {
                match result {
                    Ok((datagram, source)) => {
                        let mut guard = conn.lock("driver::handle_datagram");
                        guard.inner.handle_datagram(&datagram, source, Instant::now());
                        install_key_if_ready(&mut guard, &mut key_exchange);
                        guard.wake_all_readers();
                    }
                    Err(err) => {
                        warn!(?err, "udp recv failed, stopping driver");
                        return;
                    }
                }
            }
            _ = conn.notify.notified() => {}
            _ = sleep_until(deadline) => {
                let mut guard = conn.lock("driver::handle_timeout");
                if let Some((deadline, _)) = guard.inner.poll_timeout() {
                    guard.inner.handle_timeout(deadline, Instant::now());
                }
            }
        }

        flush(&socket, &conn).await;

        if conn.lock("driver::check_closed").inner.state() == ConnState::Closed {
            debug!("connection closed, stopping driver");
            return;
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep(at.saturating_duration_since(Instant::now())).await,
        None => std::future::pending().await,
    }
}

/// Once the peer's public value has arrived in a HANDSHAKE frame, derives the shared secret and
/// installs it, moving the connection to `active`.
fn install_key_if_ready(guard: &mut ConnectionInner, key_exchange: &mut Option<X25519KeyExchange>) {
    let Some(peer_value) = guard.inner.peer_handshake_value().cloned() else {
        return;
    };
    if peer_value.len() != 32 {
        return;
    }
    let Some(exchange) = key_exchange.take() else {
        return;
    };
    let mut peer_public = [0u8; 32];
    peer_public.copy_from_slice(&peer_value);
    let shared = exchange.derive_shared_secret(&peer_public);
    guard.inner.on_handshake_succeeded(ChaChaAead::new(&shared), Instant::now());
}

async fn flush(socket: &Arc<dyn DatagramSocket>, conn: &ConnectionRef) {
    loop {
        let next = conn.lock("driver::poll_transmit").inner.poll_transmit();
        match next {
            Some((datagram, dest)) => {
                if let Err(err) = socket.send_to(&datagram, dest).await {
                    warn!(?err, "udp send failed");
                }
            }
            None => break,
        }
    }
}
