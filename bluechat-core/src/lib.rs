//! BlueChat session protocol reference implementation.
//! Host-driven: no I/O; the host feeds inbound frames in and drains outbound frames.

pub mod event;
pub mod identity;
pub mod protocol;
pub mod session;
pub mod wire;

pub use event::{ChatEvent, Component};
pub use identity::{Peer, PeerAddr, UNKNOWN_NAME};
pub use protocol::{Frame, ServiceId, Signal, FILLER, SERVICE_NAME, SERVICE_UUID};
pub use session::{Action, PeerSession, SessionError, SessionState};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError, MAX_TEXT_LEN};
