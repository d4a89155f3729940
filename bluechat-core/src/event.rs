//! Events the engine reports upward to the application layer.

use std::fmt;

use crate::identity::Peer;

/// Engine part a mirrored debug line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Net,
    Reader,
    Sender,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Net => f.write_str("net"),
            Component::Reader => f.write_str("reader"),
            Component::Sender => f.write_str("sender"),
        }
    }
}

/// Chat event, delivered through the single application-facing sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Handshake received on the responder side.
    PeerJoined(Peer),
    /// Peer sent TERMINATE.
    PeerLeft(Peer),
    MessageReceived { from: Peer, text: String },
    /// Local echo of text the application submitted.
    MessageSent { text: String },
    /// Service is advertised and accepting connections.
    Listening,
    /// A discovery cycle finished; chatting can start.
    Ready,
    /// Engine log line mirrored upward when the debug flag is set.
    Debug { component: Component, line: String },
}
