//! The per-stream state machine (§4.7).

use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// Events a stream FSM reacts to; `frameReceived`/`appSend` carry payload bytes handled
/// out-of-band by the stream manager, per the same event/payload split as the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    AppSend,
    FrameReceived,
    AppClose,
    ResetReceived,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEffect {
    EmitFrame,
    EmitCloseMarker,
    DeliverToApp,
    MarkClosed,
}

/// Applies the fixed `(state, event) -> (state, [effects])` table (§4.7). Unlisted transitions
/// are no-ops.
pub fn transition(state: StreamState, event: StreamEvent) -> (StreamState, Vec<StreamEffect>) {
    use StreamEffect::*;
    use StreamEvent::*;
    use StreamState::*;

    match (state, event) {
        (Idle, AppSend) => (Open, vec![EmitFrame]),
        (Open, FrameReceived) => (Open, vec![DeliverToApp]),
        (Open, AppSend) => (Open, vec![EmitFrame]),
        (Open, AppClose) => (HalfClosedLocal, vec![EmitCloseMarker]),
        (Open, ResetReceived) => (Closed, vec![MarkClosed]),
        (HalfClosedLocal, FrameReceived) => (Closed, vec![MarkClosed]),
        (s, _) => (s, vec![]),
    }
}

/// An effect carrying its payload bytes, produced by feeding an event with associated data
/// through the stream manager (§4.8). Kept separate from [`StreamEffect`] so the transition
/// table itself stays free of payload concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEffectWithData {
    EmitFrame(Bytes),
    EmitCloseMarker,
    DeliverToApp(Bytes),
    MarkClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_send_opens_stream() {
        let (next, effects) = transition(StreamState::Idle, StreamEvent::AppSend);
        assert_eq!(next, StreamState::Open);
        assert_eq!(effects, vec![StreamEffect::EmitFrame]);
    }

    #[test]
    fn open_close_then_frame_received_closes() {
        let (s, _) = transition(StreamState::Idle, StreamEvent::AppSend);
        let (s, effects) = transition(s, StreamEvent::AppClose);
        assert_eq!(s, StreamState::HalfClosedLocal);
        assert_eq!(effects, vec![StreamEffect::EmitCloseMarker]);
        let (s, effects) = transition(s, StreamEvent::FrameReceived);
        assert_eq!(s, StreamState::Closed);
        assert_eq!(effects, vec![StreamEffect::MarkClosed]);
    }

    #[test]
    fn reset_received_closes_open_stream() {
        let (s, _) = transition(StreamState::Idle, StreamEvent::AppSend);
        let (s, effects) = transition(s, StreamEvent::ResetReceived);
        assert_eq!(s, StreamState::Closed);
        assert_eq!(effects, vec![StreamEffect::MarkClosed]);
    }

    #[test]
    fn unlisted_transition_from_closed_is_noop() {
        let (next, effects) = transition(StreamState::Closed, StreamEvent::AppSend);
        assert_eq!(next, StreamState::Closed);
        assert!(effects.is_empty());
    }
}
