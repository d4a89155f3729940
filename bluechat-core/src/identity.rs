//! Peer identity: the transport's address handle and the display-name snapshot events carry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name shown for a peer until its handshake arrives, when the transport reports no friendly name.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Remote peer address. Opaque to the engine; the transport decides its format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddr(String);

impl PeerAddr {
    pub fn new(addr: impl Into<String>) -> Self {
        PeerAddr(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddr {
    fn from(s: &str) -> Self {
        PeerAddr::new(s)
    }
}

/// Point-in-time view of a remote peer, as handed to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub addr: PeerAddr,
    pub name: String,
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.addr)
    }
}
