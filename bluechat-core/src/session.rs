//! Host-driven session state: one per remote peer. The host feeds inbound frames in and
//! gets back actions; outbound frames wait in the session's FIFO queue for the host's sender.

use std::collections::VecDeque;
use std::fmt;

use crate::event::ChatEvent;
use crate::identity::{Peer, PeerAddr, UNKNOWN_NAME};
use crate::protocol::{Frame, Signal};

/// Lifecycle of a peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Discovered, no stream yet.
    Pending,
    /// Service resolved, stream being opened.
    Connecting,
    /// Stream open, workers running.
    Active,
    /// TERMINATE sent or received.
    Terminating,
    /// Workers stopped, out of the registry.
    Closed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Pending, Connecting)
                | (Pending, Closed)
                | (Connecting, Active)
                | (Connecting, Closed)
                | (Active, Terminating)
                | (Active, Closed)
                | (Terminating, Terminating)
                | (Terminating, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Pending => "pending",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Terminating => "terminating",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session cannot go from {from} to {to}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

/// What the host must do after an inbound frame was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Deliver this event to the application layer.
    Emit(ChatEvent),
    /// Remove the session from the registry and stop reading.
    Close,
    /// The peer acknowledged our TERMINATE.
    TerminateAcked,
    /// Unrecognized signal; log it and keep reading.
    Unrecognized(i32),
}

/// Protocol and queue state of one peer relationship.
#[derive(Debug)]
pub struct PeerSession {
    addr: PeerAddr,
    local_name: String,
    remote_name: String,
    state: SessionState,
    outbox: VecDeque<Frame>,
}

impl PeerSession {
    /// Session for a device found by discovery; no stream yet.
    pub fn pending(addr: PeerAddr, friendly_name: Option<String>, local_name: &str) -> Self {
        Self::with_state(addr, friendly_name, local_name, SessionState::Pending)
    }

    /// Session for an accepted inbound stream; the stream already exists.
    pub fn inbound(addr: PeerAddr, friendly_name: Option<String>, local_name: &str) -> Self {
        Self::with_state(addr, friendly_name, local_name, SessionState::Active)
    }

    fn with_state(
        addr: PeerAddr,
        friendly_name: Option<String>,
        local_name: &str,
        state: SessionState,
    ) -> Self {
        Self {
            addr,
            local_name: local_name.to_string(),
            remote_name: friendly_name.unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            state,
            outbox: VecDeque::new(),
        }
    }

    pub fn addr(&self) -> &PeerAddr {
        &self.addr
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer(&self) -> Peer {
        Peer {
            addr: self.addr.clone(),
            name: self.remote_name.clone(),
        }
    }

    pub fn transition(&mut self, next: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Append a frame to the outbound queue. Display frames carry the local name as sender.
    pub fn enqueue(&mut self, signal: Signal, text: impl Into<String>) {
        let frame = Frame::new(signal, text);
        let frame = if signal.is_display() {
            frame.with_sender(self.local_name.clone())
        } else {
            frame
        };
        self.outbox.push_back(frame);
    }

    /// Pop the oldest queued frame, if any.
    pub fn dequeue_if_any(&mut self) -> Option<Frame> {
        self.outbox.pop_front()
    }

    pub fn has_pending(&self) -> bool {
        !self.outbox.is_empty()
    }

    pub fn queued(&self) -> usize {
        self.outbox.len()
    }

    /// Queue a TERMINATE and move to `Terminating`.
    pub fn terminate(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Terminating)?;
        self.outbox.push_back(Frame::control(Signal::Terminate));
        Ok(())
    }

    /// Apply one inbound frame. Acks are queued here; the returned actions are for the host.
    pub fn on_frame(&mut self, frame: Frame) -> Vec<Action> {
        let frame = self.stamp_sender(frame);
        match frame.signal {
            Signal::Message => {
                let name = frame.sender.unwrap_or_else(|| self.remote_name.clone());
                vec![Action::Emit(ChatEvent::MessageReceived {
                    from: Peer {
                        addr: self.addr.clone(),
                        name,
                    },
                    text: frame.text,
                })]
            }
            Signal::Handshake => {
                self.remote_name = frame.text;
                let ack = self.local_name.clone();
                self.enqueue(Signal::HandshakeAck, ack);
                vec![Action::Emit(ChatEvent::PeerJoined(self.peer()))]
            }
            Signal::HandshakeAck => {
                self.remote_name = frame.text;
                Vec::new()
            }
            Signal::Terminate => {
                // Already Terminating when both sides leave at once; stay there.
                if self.state == SessionState::Active {
                    self.state = SessionState::Terminating;
                }
                self.outbox.push_back(Frame::control(Signal::TerminateAck));
                vec![Action::Emit(ChatEvent::PeerLeft(self.peer())), Action::Close]
            }
            Signal::TerminateAck => vec![Action::TerminateAcked],
            Signal::Unknown(code) => vec![Action::Unrecognized(code)],
        }
    }

    /// Fill in who sent an inbound display frame. Handshakes name themselves.
    fn stamp_sender(&self, frame: Frame) -> Frame {
        if !frame.signal.is_display() || frame.sender.is_some() {
            return frame;
        }
        let name = match frame.signal {
            Signal::Handshake | Signal::HandshakeAck => frame.text.clone(),
            _ => self.remote_name.clone(),
        };
        frame.with_sender(name)
    }
}
