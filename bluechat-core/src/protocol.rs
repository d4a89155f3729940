//! BlueChat control protocol: signal kinds, their wire codes, and the chat service identity.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known identifier of the chat service. Listeners advertise it; discovery searches for it.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x1020_3040_5060_7080_90a0_b0c0_d0e0_f010);

/// Human-readable service name published next to [`SERVICE_UUID`].
pub const SERVICE_NAME: &str = "BlueChatApp";

/// Text carried by control frames that have nothing meaningful to say.
pub const FILLER: &str = "end";

/// Control-protocol tag; the first field of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Initiator announces its display name.
    Handshake,
    /// Free-form chat text.
    Message,
    /// Sender is leaving the session.
    Terminate,
    /// Responder answers a handshake with its own display name.
    HandshakeAck,
    /// Acknowledges a terminate; carries the filler text.
    TerminateAck,
    /// Any code this version does not know. Still followed by a text payload on the wire.
    Unknown(i32),
}

impl Signal {
    /// Wire code for this signal.
    pub fn code(self) -> i32 {
        match self {
            Signal::Handshake => 0,
            Signal::Message => 1,
            Signal::Terminate => 3,
            Signal::HandshakeAck => 4,
            Signal::TerminateAck => 5,
            Signal::Unknown(code) => code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Signal::Handshake,
            1 => Signal::Message,
            3 => Signal::Terminate,
            4 => Signal::HandshakeAck,
            5 => Signal::TerminateAck,
            other => Signal::Unknown(other),
        }
    }

    /// Signals shown to the user with the name of whoever sent them.
    pub fn is_display(self) -> bool {
        matches!(
            self,
            Signal::Handshake | Signal::HandshakeAck | Signal::Message
        )
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Handshake => f.write_str("HANDSHAKE"),
            Signal::Message => f.write_str("MESSAGE"),
            Signal::Terminate => f.write_str("TERMINATE"),
            Signal::HandshakeAck => f.write_str("HANDSHAKE_ACK"),
            Signal::TerminateAck => f.write_str("TERMINATE_ACK"),
            Signal::Unknown(code) => write!(f, "UNKNOWN({code})"),
        }
    }
}

/// Service identity as published by a listener and matched by a service search.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId {
    pub uuid: Uuid,
    pub name: String,
}

impl ServiceId {
    /// The chat service every BlueChat node advertises.
    pub fn chat() -> Self {
        Self {
            uuid: SERVICE_UUID,
            name: SERVICE_NAME.to_string(),
        }
    }
}

/// One wire unit: a signal and its text payload.
/// `sender` never travels on the wire; the receiving side fills it in for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub signal: Signal,
    pub sender: Option<String>,
    pub text: String,
}

impl Frame {
    pub fn new(signal: Signal, text: impl Into<String>) -> Self {
        Self {
            signal,
            sender: None,
            text: text.into(),
        }
    }

    /// Control frame carrying the filler text.
    pub fn control(signal: Signal) -> Self {
        Self::new(signal, FILLER)
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_wire_table() {
        assert_eq!(Signal::Handshake.code(), 0);
        assert_eq!(Signal::Message.code(), 1);
        assert_eq!(Signal::Terminate.code(), 3);
        assert_eq!(Signal::HandshakeAck.code(), 4);
        assert_eq!(Signal::TerminateAck.code(), 5);
    }

    #[test]
    fn unassigned_codes_are_unknown() {
        assert_eq!(Signal::from_code(2), Signal::Unknown(2));
        assert_eq!(Signal::from_code(-1), Signal::Unknown(-1));
        assert_eq!(Signal::from_code(2).code(), 2);
    }

    #[test]
    fn only_named_signals_are_display() {
        assert!(Signal::Message.is_display());
        assert!(Signal::Handshake.is_display());
        assert!(Signal::HandshakeAck.is_display());
        assert!(!Signal::Terminate.is_display());
        assert!(!Signal::TerminateAck.is_display());
        assert!(!Signal::Unknown(7).is_display());
    }

    #[test]
    fn service_uuid_is_the_published_one() {
        assert_eq!(
            SERVICE_UUID.simple().to_string(),
            "102030405060708090a0b0c0d0e0f010"
        );
    }
}
