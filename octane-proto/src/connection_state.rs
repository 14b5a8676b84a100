//! The per-connection state machine (§4.6).
//!
//! States and event *kinds* are matched by discriminant only; any payload an event carries (the
//! received packet, the close reason) is held out-of-band by the engine and handed to the effect
//! handler, per the §9 design note on event-with-payload state machines.

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    SynSent,
    Handshake,
    Active,
    Draining,
    Closed,
}

/// Events the connection FSM reacts to. Only the discriminant drives the transition table; any
/// payload lives alongside the event in the engine's dispatch, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnEvent {
    AppOpenRequested,
    /// Fed only for decoded `HANDSHAKE` frames (§9 open-question resolution); ACK/DATA frames
    /// never drive this FSM.
    PacketReceived,
    HandshakeSucceeded,
    HandshakeFailed,
    AppCloseRequested,
    Timeout(TimerLabel),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerLabel {
    Handshake,
    Drain,
}

/// Effects the engine must apply in response to a transition. These are descriptions, not
/// closures: the engine interprets each variant against its own state (send queue, timers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnEffect {
    SendHandshake,
    SendHandshakeAck,
    SendClose,
    StartTimer(TimerLabel),
    CancelTimer(TimerLabel),
    MarkHandshakeStarted,
    MarkActive,
    MarkClosed,
}

/// Applies the fixed `(state, event) -> (state, [effects])` table (§4.6). Transitions absent from
/// the table are no-ops: the state is unchanged and no effects are produced.
pub fn transition(state: ConnState, event: ConnEvent) -> (ConnState, Vec<ConnEffect>) {
    use ConnEffect::*;
    use ConnEvent::*;
    use ConnState::*;
    use TimerLabel::*;

    match (state, event) {
        (Idle, AppOpenRequested) => (
            SynSent,
            vec![SendHandshake, StartTimer(Handshake), MarkHandshakeStarted],
        ),
        (SynSent, PacketReceived) => (Handshake, vec![SendHandshakeAck]),
        (SynSent, Timeout(Handshake)) => (Closed, vec![MarkClosed]),
        (Handshake, HandshakeSucceeded) => (Active, vec![CancelTimer(Handshake), MarkActive]),
        (Handshake, HandshakeFailed) => (Closed, vec![MarkClosed]),
        (Active, AppCloseRequested) => (Draining, vec![SendClose]),
        (Draining, Timeout(Drain)) => (Closed, vec![MarkClosed]),
        (s, _) => (s, vec![]),
    }
}
