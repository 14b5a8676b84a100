//! Stream allocation, per-stream FSM storage, priority scheduling, and delivery buffers
//! (§4.8, §4.9, §4.10).

use std::collections::VecDeque;

use bytes::Bytes;
use rustc_hash::FxHashMap;

use crate::stream_state::{self, StreamEffectWithData, StreamEvent, StreamState};

/// Default priority weights (§4.9).
pub const WEIGHT_DEFAULT: u32 = 100;
pub const WEIGHT_HIGH: u32 = 200;
pub const WEIGHT_LOW: u32 = 50;
pub const WEIGHT_CONTROL: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// `open()` was called with `max_streams_per_connection` streams already live.
    ResourceExhausted,
    UnknownStream,
}

/// A per-stream finite-or-terminated ordered sequence of delivered payload slices (§4.10).
///
/// Consumers pull items in the exact order [`DeliveryBuffer::deliver`] was called; `close`
/// terminates the sequence so a consumer polling it learns the stream has ended rather than
/// blocking forever.
#[derive(Debug, Default)]
pub struct DeliveryBuffer {
    queue: VecDeque<Bytes>,
    closed: bool,
}

impl DeliveryBuffer {
    pub fn deliver(&mut self, bytes: Bytes) {
        debug_assert!(!self.closed, "delivered to a buffer after it was closed");
        self.queue.push_back(bytes);
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Pop the next delivered item, if any is queued. `None` when empty; check [`is_closed`] to
    /// distinguish "empty but more may arrive" from "stream ended".
    pub fn pop(&mut self) -> Option<Bytes> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

struct StreamRecord {
    fsm_state: StreamState,
    priority_weight: u32,
    send_queue: VecDeque<Bytes>,
    receive: DeliveryBuffer,
}

/// A simple sorted-vector priority list over live streams (§4.9). A heap isn't worth it at the
/// N <= 32 streams this engine supports per connection (§9 design note).
#[derive(Debug, Default)]
pub struct PriorityQueue {
    entries: Vec<(u32, u32)>, // (stream_id, weight), kept sorted by weight descending
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, stream_id: u32, weight: u32) {
        self.entries.retain(|&(id, _)| id != stream_id);
        let pos = self
            .entries
            .iter()
            .position(|&(_, w)| w < weight)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, (stream_id, weight));
    }

    pub fn remove(&mut self, stream_id: u32) {
        self.entries.retain(|&(id, _)| id != stream_id);
    }

    /// Pop the highest-weight stream id, if any remain.
    pub fn next(&mut self) -> Option<u32> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0).0)
        }
    }
}

/// Owns every live stream's FSM, send queue, and delivery buffer for one connection (§4.8).
pub struct StreamManager {
    streams: FxHashMap<u32, StreamRecord>,
    next_stream_id: u32,
    max_streams: u32,
    priorities: PriorityQueue,
}

impl StreamManager {
    pub fn new(max_streams: u32) -> Self {
        StreamManager {
            streams: FxHashMap::default(),
            next_stream_id: 1,
            max_streams,
            priorities: PriorityQueue::new(),
        }
    }

    /// Allocates a strictly-increasing 32-bit stream id and stores a fresh FSM + send queue.
    pub fn open(&mut self) -> Result<u32, StreamError> {
        if self.streams.len() as u32 >= self.max_streams {
            return Err(StreamError::ResourceExhausted);
        }
        let id = self.next_stream_id;
        self.next_stream_id += 1;
        self.streams.insert(
            id,
            StreamRecord {
                fsm_state: StreamState::Idle,
                priority_weight: WEIGHT_DEFAULT,
                send_queue: VecDeque::new(),
                receive: DeliveryBuffer::default(),
            },
        );
        self.priorities.add(id, WEIGHT_DEFAULT);
        Ok(id)
    }

    pub fn set_priority(&mut self, stream_id: u32, weight: u32) -> Result<(), StreamError> {
        let record = self
            .streams
            .get_mut(&stream_id)
            .ok_or(StreamError::UnknownStream)?;
        record.priority_weight = weight;
        self.priorities.add(stream_id, weight);
        Ok(())
    }

    pub fn priority_queue_mut(&mut self) -> &mut PriorityQueue {
        &mut self.priorities
    }

    fn feed(
        &mut self,
        stream_id: u32,
        event: StreamEvent,
        data: Option<Bytes>,
    ) -> Result<Vec<StreamEffectWithData>, StreamError> {
        let record = self
            .streams
            .get_mut(&stream_id)
            .ok_or(StreamError::UnknownStream)?;
        let (next_state, effects) = stream_state::transition(record.fsm_state, event);
        record.fsm_state = next_state;

        let mut out = Vec::with_capacity(effects.len());
        for effect in effects {
            match effect {
                stream_state::StreamEffect::EmitFrame => {
                    let bytes = data.clone().unwrap_or_default();
                    record.send_queue.push_back(bytes.clone());
                    out.push(StreamEffectWithData::EmitFrame(bytes));
                }
                stream_state::StreamEffect::EmitCloseMarker => {
                    out.push(StreamEffectWithData::EmitCloseMarker);
                }
                stream_state::StreamEffect::DeliverToApp => {
                    let bytes = data.clone().unwrap_or_default();
                    record.receive.deliver(bytes.clone());
                    out.push(StreamEffectWithData::DeliverToApp(bytes));
                }
                stream_state::StreamEffect::MarkClosed => {
                    record.receive.close();
                    out.push(StreamEffectWithData::MarkClosed);
                }
            }
        }
        Ok(out)
    }

    /// Feeds `appSend` to `stream_id`'s FSM; resulting `emitFrame` effects carry `bytes`.
    pub fn on_app_send(
        &mut self,
        stream_id: u32,
        bytes: Bytes,
    ) -> Result<Vec<StreamEffectWithData>, StreamError> {
        self.feed(stream_id, StreamEvent::AppSend, Some(bytes))
    }

    /// Feeds `frameReceived`; resulting `deliverToApp` effects carry `bytes`.
    pub fn on_frame_received(
        &mut self,
        stream_id: u32,
        bytes: Bytes,
    ) -> Result<Vec<StreamEffectWithData>, StreamError> {
        self.feed(stream_id, StreamEvent::FrameReceived, Some(bytes))
    }

    pub fn on_app_close(&mut self, stream_id: u32) -> Result<Vec<StreamEffectWithData>, StreamError> {
        self.feed(stream_id, StreamEvent::AppClose, None)
    }

    pub fn on_reset_received(&mut self, stream_id: u32) -> Result<Vec<StreamEffectWithData>, StreamError> {
        self.feed(stream_id, StreamEvent::ResetReceived, None)
    }

    pub fn receive_buffer_mut(&mut self, stream_id: u32) -> Option<&mut DeliveryBuffer> {
        self.streams.get_mut(&stream_id).map(|r| &mut r.receive)
    }

    pub fn pop_send_queue(&mut self, stream_id: u32) -> Option<Bytes> {
        self.streams.get_mut(&stream_id)?.send_queue.pop_front()
    }

    /// Removes the stream's state and finalizes its delivery buffer.
    pub fn close(&mut self, stream_id: u32) {
        if let Some(mut record) = self.streams.remove(&stream_id) {
            record.receive.close();
        }
        self.priorities.remove(stream_id);
    }

    pub fn contains(&self, stream_id: u32) -> bool {
        self.streams.contains_key(&stream_id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_allocates_ascending_ids() {
        let mut mgr = StreamManager::new(32);
        assert_eq!(mgr.open().unwrap(), 1);
        assert_eq!(mgr.open().unwrap(), 2);
        assert_eq!(mgr.open().unwrap(), 3);
    }

    #[test]
    fn open_fails_past_cap() {
        let mut mgr = StreamManager::new(2);
        mgr.open().unwrap();
        mgr.open().unwrap();
        assert_eq!(mgr.open(), Err(StreamError::ResourceExhausted));
    }

    #[test]
    fn send_then_receive_round_trip_in_order() {
        let mut mgr = StreamManager::new(32);
        let id = mgr.open().unwrap();
        mgr.on_app_send(id, Bytes::from_static(b"m1")).unwrap();
        mgr.on_app_send(id, Bytes::from_static(b"m2")).unwrap();
        assert_eq!(mgr.pop_send_queue(id), Some(Bytes::from_static(b"m1")));
        assert_eq!(mgr.pop_send_queue(id), Some(Bytes::from_static(b"m2")));

        mgr.on_frame_received(id, Bytes::from_static(b"m1")).unwrap();
        mgr.on_frame_received(id, Bytes::from_static(b"m2")).unwrap();
        let buf = mgr.receive_buffer_mut(id).unwrap();
        assert_eq!(buf.pop(), Some(Bytes::from_static(b"m1")));
        assert_eq!(buf.pop(), Some(Bytes::from_static(b"m2")));
    }

    #[test]
    fn close_finalizes_delivery_and_frees_slot() {
        let mut mgr = StreamManager::new(1);
        let id = mgr.open().unwrap();
        assert_eq!(mgr.open(), Err(StreamError::ResourceExhausted));
        mgr.close(id);
        assert!(!mgr.contains(id));
        assert_eq!(mgr.open().unwrap(), 2);
    }

    #[test]
    fn priority_queue_pops_highest_weight_first() {
        let mut pq = PriorityQueue::new();
        pq.add(1, WEIGHT_DEFAULT);
        pq.add(2, WEIGHT_CONTROL);
        pq.add(3, WEIGHT_LOW);
        assert_eq!(pq.next(), Some(2));
        assert_eq!(pq.next(), Some(1));
        assert_eq!(pq.next(), Some(3));
        assert_eq!(pq.next(), None);
    }
}
