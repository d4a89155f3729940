//! Transport abstraction: the five primitives the engine needs from the short-range stack.
//! Discovery results arrive asynchronously on a [`DiscoverySink`], tagged by transaction id.

use std::fmt;

use async_trait::async_trait;
use bluechat_core::{PeerAddr, ServiceId};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

/// Identifies one service search issued by [`Transport::search_services`].
pub type TransactionId = u32;

/// Channel on which the transport delivers discovery callbacks.
pub type DiscoverySink = mpsc::UnboundedSender<DiscoveryEvent>;

/// A device seen during inquiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub addr: PeerAddr,
    /// Friendly name reported by the device, if any.
    pub name: Option<String>,
}

/// A service instance found on a device: where to open a stream to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub addr: PeerAddr,
    pub service: ServiceId,
    pub endpoint: String,
}

/// How a service search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    Completed,
    NoRecords,
    Terminated,
    Error,
    DeviceNotReachable,
}

impl fmt::Display for SearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SearchStatus::Completed => "SERVICE_SEARCH_COMPLETED",
            SearchStatus::NoRecords => "SERVICE_SEARCH_NO_RECORDS",
            SearchStatus::Terminated => "SERVICE_SEARCH_TERMINATED",
            SearchStatus::Error => "SERVICE_SEARCH_ERROR",
            SearchStatus::DeviceNotReachable => "SERVICE_SEARCH_DEVICE_NOT_REACHABLE",
        };
        f.write_str(s)
    }
}

/// Discovery callback. Each search produces zero or more `ServicesDiscovered` followed by
/// exactly one `SearchCompleted` with the same transaction id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    DeviceDiscovered(DiscoveredDevice),
    InquiryCompleted,
    ServicesDiscovered {
        trans_id: TransactionId,
        records: Vec<ServiceRecord>,
    },
    SearchCompleted {
        trans_id: TransactionId,
        status: SearchStatus,
    },
}

/// An accepted inbound stream and what the transport knows about its origin.
pub struct Inbound<S> {
    pub stream: S,
    pub addr: PeerAddr,
    pub name: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("service host closed")]
    Closed,
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Short-range transport as seen by the engine.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;
    type Host: ServiceHost<Stream = Self::Stream>;

    /// Publish `service` and return the host that accepts connections to it.
    async fn advertise(&self, service: &ServiceId) -> Result<Self::Host, TransportError>;

    /// Start a device inquiry. Emits `DeviceDiscovered` per device, then `InquiryCompleted`.
    fn start_inquiry(&self, sink: DiscoverySink) -> Result<(), TransportError>;

    /// Start a search for `service` on `device`. Results are tagged with the returned id.
    fn search_services(
        &self,
        service: &ServiceId,
        device: &PeerAddr,
        sink: DiscoverySink,
    ) -> Result<TransactionId, TransportError>;

    /// Open a stream to a discovered service.
    async fn open(&self, record: &ServiceRecord) -> Result<Self::Stream, TransportError>;
}

/// Accept side of an advertised service.
#[async_trait]
pub trait ServiceHost: Send + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    async fn accept(&mut self) -> Result<Inbound<Self::Stream>, TransportError>;

    /// Stop advertising and release the accept socket.
    async fn close(&mut self);
}
