//! Typed send/receive handles for one application stream (§4.8-§4.10), generalized from the
//! chunked `AsyncWrite`-style futures in `quinn/src/send_stream.rs` to whole-message send/receive
//! of `serde`-typed values, matched to this transport's message-oriented `Frame::Data` (§3) rather
//! than quinn's byte-stream abstraction.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec;
use crate::connection::ConnectionRef;
use crate::error::{ReadError, WriteError};

/// The sending half of an application stream.
pub struct SendStream {
    conn: ConnectionRef,
    stream_id: u32,
}

impl SendStream {
    pub(crate) fn new(conn: ConnectionRef, stream_id: u32) -> Self {
        SendStream { conn, stream_id }
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Encodes `value` and hands it to the engine. The engine either emits it immediately or
    /// queues it pending congestion-window headroom (§4.12); either way this returns as soon as
    /// it's accepted into that queue; it does not wait for the peer to acknowledge it.
    pub async fn send<T: Serialize>(&mut self, value: &T) -> Result<(), WriteError> {
        let bytes = codec::encode(value).map_err(WriteError::Codec)?;
        {
            let mut guard = self.conn.lock("SendStream::send");
            guard
                .inner
                .send(self.stream_id, bytes, Instant::now())
                .map_err(WriteError::ConnectionClosed)?;
        }
        self.conn.notify_driver();
        Ok(())
    }

    /// Sends a raw, already-encoded payload, bypassing the codec.
    pub async fn send_bytes(&mut self, bytes: bytes::Bytes) -> Result<(), WriteError> {
        {
            let mut guard = self.conn.lock("SendStream::send_bytes");
            guard
                .inner
                .send(self.stream_id, bytes, Instant::now())
                .map_err(WriteError::ConnectionClosed)?;
        }
        self.conn.notify_driver();
        Ok(())
    }

    pub fn finish(&mut self) {
        let mut guard = self.conn.lock("SendStream::finish");
        guard.inner.close_stream(self.stream_id);
    }
}

/// The receiving half of an application stream.
pub struct RecvStream {
    conn: ConnectionRef,
    stream_id: u32,
}

impl RecvStream {
    pub(crate) fn new(conn: ConnectionRef, stream_id: u32) -> Self {
        RecvStream { conn, stream_id }
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Waits for and decodes the next value delivered on this stream, in the order it was sent
    /// (§4.9: delivery buffers never reorder).
    pub fn receive<T: DeserializeOwned>(&mut self) -> Receive<'_, T> {
        Receive {
            stream: self,
            _marker: std::marker::PhantomData,
        }
    }
}

/// Future produced by [`RecvStream::receive`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Receive<'a, T> {
    stream: &'a mut RecvStream,
    _marker: std::marker::PhantomData<T>,
}

impl<'a, T: DeserializeOwned> Future for Receive<'a, T> {
    type Output = Result<T, ReadError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut guard = this.stream.conn.lock("RecvStream::poll_receive");
        match guard.inner.poll_deliver(this.stream.stream_id) {
            Some(bytes) => {
                Poll::Ready(codec::decode(&bytes).map_err(ReadError::Codec))
            }
            None => {
                if guard.inner.state() == octane_proto::connection_state::ConnState::Closed {
                    return Poll::Ready(Err(ReadError::ConnectionClosed(
                        octane_proto::ConnectionError::ConnectionClosed,
                    )));
                }
                if guard.inner.is_stream_closed(this.stream.stream_id) {
                    return Poll::Ready(Err(ReadError::StreamClosed));
                }
                guard
                    .blocked_readers
                    .entry(this.stream.stream_id)
                    .or_default()
                    .push(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
