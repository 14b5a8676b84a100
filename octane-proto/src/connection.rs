//! The connection engine: orchestrates every other module, end to end (§4.12).
//!
//! This is a sans-I/O actor in the spirit of quinn-proto's `Endpoint`/`Connection` split: it
//! performs no socket I/O itself. A driver (see `octane::connection::ConnectionRef`) feeds it
//! inbound datagrams and timer fires via [`Connection::handle_datagram`] /
//! [`Connection::handle_timeout`], and drains outbound datagrams via [`Connection::poll_transmit`].
//! All mutation of a connection's state happens through this one type, from one caller at a time
//! (§5): there is no interior locking here, that's the driver's job.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::RngCore;
use tracing::{debug, trace, warn};

use crate::coalesce;
use crate::config::{SecurityConfig, TransportConfig};
use crate::congestion::CongestionController;
use crate::connection_state::{self, ConnEffect, ConnEvent, ConnState, TimerLabel};
use crate::error::ConnectionError;
use crate::frame::Frame;
use crate::migration::MigrationTracker;
use crate::packet::Packet;
use crate::reliability::ReliabilityTracker;
use crate::security::{Aead, SecurityManager};
use crate::stream::{StreamError, StreamManager};
use crate::stream_state::StreamEffectWithData;

/// A point-in-time snapshot of connection statistics (§4.12, §6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub rtt: Duration,
    pub cwnd: u32,
    pub loss_rate: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_acked: u64,
    pub packets_lost: u64,
}

/// Which deadline fired, so the driver knows which timer to re-arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    Handshake,
    Drain,
    Retransmission,
}

struct Timers {
    handshake: Option<Instant>,
    drain: Option<Instant>,
}

/// Which role this endpoint plays; only affects who initiates the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

/// The connection engine. Generic over the opaque AEAD primitive (§6); key exchange lives
/// entirely outside this type; the driver supplies a derived key once the handshake completes.
pub struct Connection<A: Aead> {
    side: Side,
    connection_id: u32,
    state: ConnState,
    reliability: ReliabilityTracker,
    congestion: CongestionController,
    security: Option<SecurityManager<A>>,
    security_config: SecurityConfig,
    migration: MigrationTracker,
    streams: StreamManager,
    config: TransportConfig,
    timers: Timers,
    /// Offset subtracted from a packet's wire `packet_number` to derive this implementation's
    /// AEAD nonce. There is no separate nonce field on the wire (§3's header is fixed and
    /// doesn't carry one); nonces are derived from packet numbers, with this offset advanced on
    /// every key rotation so the nonce resets to 0 post-rotation (I6) independently of the
    /// packet-number space, which keeps climbing per I1.
    nonce_offset: u32,
    /// The most recent non-empty HANDSHAKE frame payload received from the peer (the opaque
    /// ECDH public value, §6). A driver derives its shared secret from this and supplies the
    /// resulting key to [`Connection::on_handshake_succeeded`]; the engine never looks inside it.
    peer_handshake_value: Option<Bytes>,
    outbound_packets: Vec<Packet>,
    outbound_datagrams: VecDeque<(Bytes, SocketAddr)>,
    pending_send: VecDeque<(u32, Bytes)>,
    stats: Stats,
}

impl<A: Aead> Connection<A> {
    pub fn new(
        side: Side,
        peer_addr: SocketAddr,
        config: TransportConfig,
    ) -> Self {
        let now = Instant::now();
        let connection_id = rand::thread_rng().next_u32();
        let security_config = SecurityConfig::from(&config);
        Connection {
            side,
            connection_id,
            state: ConnState::Idle,
            reliability: ReliabilityTracker::new(),
            congestion: CongestionController::new(
                config.initial_cwnd_bytes,
                config.initial_ssthresh_bytes,
                config.mss_bytes,
                config.max_cwnd_bytes,
                now,
            ),
            security: None,
            security_config,
            migration: MigrationTracker::new(
                peer_addr,
                config.migration_min_interval,
                config.migration_max_count,
            ),
            streams: StreamManager::new(config.max_streams_per_connection),
            config,
            timers: Timers {
                handshake: None,
                drain: None,
            },
            nonce_offset: 0,
            peer_handshake_value: None,
            outbound_packets: Vec::new(),
            outbound_datagrams: VecDeque::new(),
            pending_send: VecDeque::new(),
            stats: Stats {
                rtt: Duration::ZERO,
                cwnd: 0, // overwritten by `stats()`, which always reads the live congestion window
                loss_rate: 0.0,
                bytes_sent: 0,
                bytes_received: 0,
                packets_sent: 0,
                packets_acked: 0,
                packets_lost: 0,
            },
        }
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.migration.current_addr()
    }

    /// The peer's most recently received (opaque) HANDSHAKE payload, if any, for a driver to
    /// derive a shared key from before calling [`Connection::on_handshake_succeeded`].
    pub fn peer_handshake_value(&self) -> Option<&Bytes> {
        self.peer_handshake_value.as_ref()
    }

    /// Kicks off the handshake. With no listen/accept demultiplexing (§1 Non-goals, one
    /// connection per UDP port), both endpoints of a connection call this symmetrically: each
    /// side builds and queues a HANDSHAKE packet carrying its own `local_public_value` (the
    /// opaque ECDH public value, §6) and arms its own handshake timer.
    pub fn initiate(&mut self, local_public_value: [u8; 32], now: Instant) {
        self.apply(connection_state::transition(
            self.state,
            ConnEvent::AppOpenRequested,
        ), now, Some(&local_public_value));
    }

    /// Installs the key derived from a completed handshake and moves the connection to `active`.
    ///
    /// Packet numbers already spent on (plaintext) handshake frames become the nonce baseline, so
    /// the first post-handshake packet's nonce is 0, matching a freshly constructed
    /// `SecurityManager`'s own counter.
    pub fn on_handshake_succeeded(&mut self, key: A, now: Instant) {
        self.security = Some(SecurityManager::new(key, self.security_config, now));
        self.nonce_offset = self.reliability.peek_next();
        self.apply(
            connection_state::transition(self.state, ConnEvent::HandshakeSucceeded),
            now,
            None,
        );
    }

    pub fn on_handshake_failed(&mut self, now: Instant) {
        self.apply(
            connection_state::transition(self.state, ConnEvent::HandshakeFailed),
            now,
            None,
        );
    }

    fn apply(
        &mut self,
        (next_state, effects): (ConnState, Vec<ConnEffect>),
        now: Instant,
        handshake_payload: Option<&[u8; 32]>,
    ) {
        self.state = next_state;
        for effect in effects {
            match effect {
                ConnEffect::SendHandshake => {
                    let payload = handshake_payload.copied().unwrap_or([0u8; 32]);
                    self.queue_plaintext_frame(Frame::Handshake(Bytes::copy_from_slice(&payload)));
                }
                ConnEffect::SendHandshakeAck => {
                    self.queue_plaintext_frame(Frame::Handshake(Bytes::new()));
                }
                ConnEffect::SendClose => {
                    self.queue_plaintext_frame(Frame::Reset);
                }
                ConnEffect::StartTimer(TimerLabel::Handshake) => {
                    self.timers.handshake = Some(now + self.config.handshake_timeout);
                }
                ConnEffect::StartTimer(TimerLabel::Drain) => {
                    self.timers.drain = Some(now + self.config.drain_timeout);
                }
                ConnEffect::CancelTimer(TimerLabel::Handshake) => {
                    self.timers.handshake = None;
                }
                ConnEffect::CancelTimer(TimerLabel::Drain) => {
                    self.timers.drain = None;
                }
                ConnEffect::MarkHandshakeStarted | ConnEffect::MarkActive => {}
                ConnEffect::MarkClosed => {
                    self.finalize_close();
                }
            }
        }
        if self.state == ConnState::Draining && self.timers.drain.is_none() {
            self.timers.drain = Some(now + self.config.drain_timeout);
        }
    }

    fn finalize_close(&mut self) {
        self.timers.handshake = None;
        self.timers.drain = None;
    }

    /// Handshake frames are sent before a key exists, so they travel as plaintext with pn 0-ish
    /// bookkeeping: allocate a packet number but skip the security manager entirely.
    fn queue_plaintext_frame(&mut self, frame: Frame) {
        let pn = self.reliability.allocate();
        let is_handshake = matches!(frame, Frame::Handshake(_));
        let payload = frame.encode();
        self.stats.bytes_sent += payload.len() as u64;
        let mut packet = Packet::new(self.connection_id, pn, 0, payload);
        if is_handshake {
            packet.flags |= crate::packet::FLAG_HANDSHAKE;
        }
        self.outbound_packets.push(packet);
        self.stats.packets_sent += 1;
        self.flush();
    }

    /// The AEAD nonce used for packet `pn`, derived from the packet-number space per this
    /// implementation's resolution of the "no nonce field on the wire" gap (see `nonce_offset`).
    fn nonce_for(&self, pn: u32) -> u64 {
        pn.wrapping_sub(self.nonce_offset) as u64
    }

    /// Opens a new application stream, subject to the concurrent-stream cap (§4.8).
    pub fn open_stream(&mut self) -> Result<u32, StreamError> {
        self.streams.open()
    }

    /// Runs the stream's FSM for `appSend`; frames that pass congestion control go straight to
    /// the wire, others are appended to the pending send queue for later draining (§4.12).
    pub fn send(&mut self, stream_id: u32, data: Bytes, now: Instant) -> Result<(), ConnectionError> {
        if self.state == ConnState::Closed || self.state == ConnState::Draining {
            return Err(ConnectionError::ConnectionClosed);
        }
        let effects = self
            .streams
            .on_app_send(stream_id, data)
            .map_err(|_| ConnectionError::ConnectionClosed)?;
        for effect in effects {
            if let StreamEffectWithData::EmitFrame(bytes) = effect {
                self.streams.pop_send_queue(stream_id);
                self.try_send_data_frame(stream_id, bytes, now);
            }
        }
        self.flush();
        Ok(())
    }

    fn try_send_data_frame(&mut self, stream_id: u32, bytes: Bytes, now: Instant) {
        let frame = Frame::Data(bytes);
        let payload = frame.encode();
        if self.congestion.can_send(payload.len(), now) {
            self.emit_encrypted(stream_id, payload, true, now);
        } else {
            self.pending_send.push_back((stream_id, payload));
        }
    }

    /// Encrypts and queues `plaintext` for transmission. `ack_eliciting` gates whether the packet
    /// enters congestion/reliability in-flight bookkeeping at all: ACK and other pure control
    /// packets are never acknowledged themselves, so counting them against `bytes_in_flight`
    /// would grow it without bound and never drain it (§4.12, I3).
    fn emit_encrypted(&mut self, stream_id: u32, plaintext: Bytes, ack_eliciting: bool, now: Instant) {
        let pn = self.reliability.allocate();
        let ciphertext = match &mut self.security {
            Some(security) => {
                let (nonce, ciphertext) = security.encrypt(&plaintext);
                debug_assert_eq!(nonce, self.nonce_for(pn));
                Bytes::from(ciphertext)
            }
            None => plaintext.clone(),
        };
        if ack_eliciting {
            self.congestion.mark_in_flight(ciphertext.len() as u32);
            self.reliability.note_sent(pn, plaintext, ciphertext.len(), now);
        }
        self.stats.bytes_sent += ciphertext.len() as u64;
        self.stats.packets_sent += 1;
        self.outbound_packets
            .push(Packet::new(self.connection_id, pn, stream_id, ciphertext));
    }

    /// Re-drains the pending send queue in FIFO order, stopping at the first denial (§4.12, §5).
    fn drain_pending(&mut self, now: Instant) {
        while let Some((stream_id, payload)) = self.pending_send.front().cloned() {
            if self.congestion.can_send(payload.len(), now) {
                self.pending_send.pop_front();
                self.emit_encrypted(stream_id, payload, true, now);
            } else {
                break;
            }
        }
    }

    /// Flushes the coalesce buffer into MTU-bounded datagrams addressed to the current peer
    /// address (§4.2, §4.12 flush policy).
    fn flush(&mut self) {
        if self.outbound_packets.is_empty() {
            return;
        }
        let packets = std::mem::take(&mut self.outbound_packets);
        let dest = self.migration.current_addr();
        for datagram in coalesce::coalesce(&packets, self.config.coalesce_mtu_bytes as usize) {
            self.outbound_datagrams.push_back((datagram, dest));
        }
    }

    /// Pulls the next datagram ready to hand to the UDP collaborator.
    pub fn poll_transmit(&mut self) -> Option<(Bytes, SocketAddr)> {
        self.outbound_datagrams.pop_front()
    }

    /// Processes one inbound UDP datagram: splits it into packets and handles each in order.
    pub fn handle_datagram(&mut self, datagram: &[u8], source: SocketAddr, now: Instant) {
        if !self.migration.validate(source) {
            trace!(?source, "dropping datagram from unvalidated source address");
            return;
        }
        if self.migration.has_changed(source) && self.migration.migrate(source, now) {
            debug!(?source, "peer migrated");
        }

        let packets = match coalesce::split(datagram) {
            Ok(packets) => packets,
            Err(err) => {
                trace!(?err, "dropping malformed datagram");
                return;
            }
        };
        for packet in packets {
            self.handle_packet(packet, now);
        }
    }

    fn handle_packet(&mut self, packet: Packet, now: Instant) {
        if packet.version != crate::packet::VERSION {
            trace!("dropping packet with unknown version");
            return;
        }
        self.stats.bytes_received += packet.payload.len() as u64;

        let nonce = self.nonce_for(packet.packet_number);
        let plaintext = match &mut self.security {
            None => packet.payload,
            Some(security) => {
                if !security.validate_incoming(nonce) {
                    warn!("dropping packet failing replay validation");
                    return;
                }
                match security.decrypt(&packet.payload, nonce) {
                    Ok(plaintext) => Bytes::from(plaintext),
                    Err(_) => {
                        warn!("dropping packet failing AEAD authentication");
                        return;
                    }
                }
            }
        };

        let frame = match Frame::decode(&plaintext) {
            Ok(frame) => frame,
            Err(err) => {
                trace!(?err, "dropping packet with malformed frame");
                return;
            }
        };

        match frame {
            Frame::Handshake(payload) => {
                if !payload.is_empty() {
                    self.peer_handshake_value = Some(payload);
                }
                self.apply(
                    connection_state::transition(self.state, ConnEvent::PacketReceived),
                    now,
                    None,
                );
            }
            Frame::Ack {
                largest_acked: _,
                ranges,
            } => {
                for &(start, end) in ranges.as_slice() {
                    for pn in start..=end {
                        if self.reliability.is_acked(pn) {
                            continue; // already applied, avoid double-counting bytes_in_flight
                        }
                        // `None` means `pn` wasn't actually in flight (unknown/already-expired
                        // packet number); a silent no-op per §7, nothing to credit back.
                        if let Some(acked_len) = self.reliability.note_ack(pn, now) {
                            self.stats.packets_acked += 1;
                            self.congestion.on_ack(acked_len as u32);
                        }
                    }
                }
                self.drain_pending(now);
                self.flush();
            }
            Frame::Data(bytes) if packet.stream_id != 0 => {
                if let Ok(effects) = self.streams.on_frame_received(packet.stream_id, bytes) {
                    let _ = effects;
                }
                self.schedule_ack_for(packet.packet_number, now);
            }
            Frame::Reset if packet.stream_id != 0 => {
                let _ = self.streams.on_reset_received(packet.stream_id);
            }
            Frame::Ping => self.queue_plaintext_frame(Frame::Pong),
            Frame::Pong => {}
            _ => {
                trace!("dropping frame on an unexpected stream id");
            }
        }
    }

    fn schedule_ack_for(&mut self, pn: u32, now: Instant) {
        let mut ranges = crate::reliability::AckRanges::new();
        ranges.insert(pn);
        let frame = Frame::Ack {
            largest_acked: pn,
            ranges,
        };
        let payload = frame.encode();
        self.emit_encrypted(0, payload, false, now);
        self.flush();
    }

    /// Reads a delivered payload slice off a stream's receive buffer, if any is queued.
    pub fn poll_deliver(&mut self, stream_id: u32) -> Option<Bytes> {
        self.streams.receive_buffer_mut(stream_id)?.pop()
    }

    pub fn is_stream_closed(&mut self, stream_id: u32) -> bool {
        self.streams
            .receive_buffer_mut(stream_id)
            .map(|b| b.is_closed())
            .unwrap_or(true)
    }

    pub fn close_stream(&mut self, stream_id: u32) {
        self.streams.close(stream_id);
    }

    /// Requests a graceful close; idempotent (§7).
    pub fn close(&mut self, now: Instant) {
        if self.state == ConnState::Closed {
            return;
        }
        self.apply(
            connection_state::transition(self.state, ConnEvent::AppCloseRequested),
            now,
            None,
        );
        self.flush();
    }

    /// The earliest deadline the driver should wake up for, if any, paired with its label.
    pub fn poll_timeout(&self) -> Option<(Deadline, Instant)> {
        let mut candidates = Vec::new();
        if let Some(t) = self.timers.handshake {
            candidates.push((Deadline::Handshake, t));
        }
        if let Some(t) = self.timers.drain {
            candidates.push((Deadline::Drain, t));
        }
        if self.reliability.bytes_in_flight() > 0 {
            candidates.push((Deadline::Retransmission, Instant::now() + self.reliability.rto()));
        }
        candidates.into_iter().min_by_key(|&(_, t)| t)
    }

    /// Applies a fired timer. For `Retransmission`, emits `on_loss` for each timed-out packet and
    /// retransmits its retained payload under a fresh packet number (§4.12, §9 open question).
    pub fn handle_timeout(&mut self, deadline: Deadline, now: Instant) {
        match deadline {
            Deadline::Handshake => {
                if matches!(self.timers.handshake, Some(t) if now >= t) {
                    self.apply(
                        connection_state::transition(self.state, ConnEvent::Timeout(TimerLabel::Handshake)),
                        now,
                        None,
                    );
                }
            }
            Deadline::Drain => {
                if matches!(self.timers.drain, Some(t) if now >= t) {
                    self.apply(
                        connection_state::transition(self.state, ConnEvent::Timeout(TimerLabel::Drain)),
                        now,
                        None,
                    );
                }
            }
            Deadline::Retransmission => {
                let rto = self.reliability.rto();
                let expired = self.reliability.timed_out(now, rto);
                for (_, payload) in expired {
                    self.congestion.on_loss(now);
                    self.stats.packets_lost += 1;
                    let pn = self.reliability.allocate();
                    let ciphertext = match &mut self.security {
                        Some(security) => Bytes::from(security.encrypt(&payload).1),
                        None => payload.clone(),
                    };
                    self.congestion.mark_in_flight(ciphertext.len() as u32);
                    self.reliability.note_sent(pn, payload, ciphertext.len(), now);
                    self.outbound_packets
                        .push(Packet::new(self.connection_id, pn, 0, ciphertext));
                }
                self.flush();
            }
        }
    }

    /// Whether the key should be rotated; the driver is responsible for deriving and supplying a
    /// fresh key via [`Connection::rotate_key`] since key derivation is an opaque collaborator.
    pub fn should_rotate_key(&self, now: Instant) -> bool {
        self.security
            .as_ref()
            .map(|s| s.should_rotate(now))
            .unwrap_or(false)
    }

    pub fn rotate_key(&mut self, new_key: A, now: Instant) {
        if let Some(security) = &mut self.security {
            security.rotate(new_key, now);
            // The next packet number allocated becomes the new nonce baseline, so its nonce is
            // 0 immediately after rotation (I6), matching `SecurityManager::rotate`'s own reset.
            self.nonce_offset = self.reliability.peek_next();
        }
    }

    pub fn stats(&self) -> Stats {
        let rtt = self.reliability.rtt().srtt.unwrap_or(Duration::ZERO);
        let loss_rate = if self.stats.packets_sent > 0 {
            self.stats.packets_lost as f64 / self.stats.packets_sent as f64
        } else {
            0.0
        };
        Stats {
            rtt,
            cwnd: self.congestion.cwnd(),
            loss_rate,
            ..self.stats
        }
    }
}
