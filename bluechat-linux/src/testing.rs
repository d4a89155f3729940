//! In-memory transport for tests: devices on a shared hub, streams over `tokio::io::duplex`.
//! Service searches are instrumented to catch two searches outstanding at once.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bluechat_core::{PeerAddr, ServiceId};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use crate::session::lock;
use crate::transport::{
    DiscoveredDevice, DiscoveryEvent, DiscoverySink, Inbound, SearchStatus, ServiceHost,
    ServiceRecord, TransactionId, Transport, TransportError,
};

const PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Default)]
struct Device {
    name: String,
    services: HashMap<ServiceId, mpsc::UnboundedSender<Inbound<DuplexStream>>>,
}

/// The "air" all in-memory devices share.
#[derive(Default)]
pub struct MemHub {
    devices: Mutex<HashMap<PeerAddr, Device>>,
    searches_started: AtomicUsize,
    overlapping_searches: AtomicUsize,
    search_outstanding: AtomicBool,
    next_trans: AtomicU32,
    reject_inquiries: AtomicBool,
    refused_searches: Mutex<HashSet<PeerAddr>>,
}

impl MemHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a device and return a transport bound to it.
    pub fn device(self: &Arc<Self>, addr: &str, name: &str) -> MemTransport {
        let addr = PeerAddr::new(addr);
        lock(&self.devices).insert(
            addr.clone(),
            Device {
                name: name.to_string(),
                services: HashMap::new(),
            },
        );
        MemTransport {
            hub: self.clone(),
            addr,
        }
    }

    pub fn searches_started(&self) -> usize {
        self.searches_started.load(Ordering::SeqCst)
    }

    pub fn overlapping_searches(&self) -> usize {
        self.overlapping_searches.load(Ordering::SeqCst)
    }

    /// Make every later `start_inquiry` fail.
    pub fn reject_inquiries(&self) {
        self.reject_inquiries.store(true, Ordering::SeqCst);
    }

    /// Make service searches targeting `addr` fail.
    pub fn refuse_search_on(&self, addr: &str) {
        lock(&self.refused_searches).insert(PeerAddr::new(addr));
    }
}

#[derive(Clone)]
pub struct MemTransport {
    hub: Arc<MemHub>,
    addr: PeerAddr,
}

#[async_trait]
impl Transport for MemTransport {
    type Stream = DuplexStream;
    type Host = MemHost;

    async fn advertise(&self, service: &ServiceId) -> Result<MemHost, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut devices = lock(&self.hub.devices);
        let device = devices
            .get_mut(&self.addr)
            .ok_or_else(|| TransportError::Rejected("device not on hub".into()))?;
        device.services.insert(service.clone(), tx);
        Ok(MemHost { rx })
    }

    fn start_inquiry(&self, sink: DiscoverySink) -> Result<(), TransportError> {
        if self.hub.reject_inquiries.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("radio busy".into()));
        }
        let found: Vec<DiscoveredDevice> = lock(&self.hub.devices)
            .iter()
            .filter(|(addr, _)| **addr != self.addr)
            .map(|(addr, d)| DiscoveredDevice {
                addr: addr.clone(),
                name: Some(d.name.clone()),
            })
            .collect();
        tokio::spawn(async move {
            for device in found {
                let _ = sink.send(DiscoveryEvent::DeviceDiscovered(device));
                tokio::task::yield_now().await;
            }
            let _ = sink.send(DiscoveryEvent::InquiryCompleted);
        });
        Ok(())
    }

    fn search_services(
        &self,
        service: &ServiceId,
        device: &PeerAddr,
        sink: DiscoverySink,
    ) -> Result<TransactionId, TransportError> {
        let hub = self.hub.clone();
        hub.searches_started.fetch_add(1, Ordering::SeqCst);
        if lock(&hub.refused_searches).contains(device) {
            return Err(TransportError::Rejected(format!("search on {device} refused")));
        }
        if hub.search_outstanding.swap(true, Ordering::SeqCst) {
            hub.overlapping_searches.fetch_add(1, Ordering::SeqCst);
            return Err(TransportError::Rejected("search already outstanding".into()));
        }
        let trans_id = hub.next_trans.fetch_add(1, Ordering::SeqCst) + 100;
        let records: Vec<ServiceRecord> = lock(&hub.devices)
            .get(device)
            .filter(|d| d.services.contains_key(service))
            .map(|_| ServiceRecord {
                addr: device.clone(),
                service: service.clone(),
                endpoint: format!("mem://{device}"),
            })
            .into_iter()
            .collect();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let status = if records.is_empty() {
                SearchStatus::NoRecords
            } else {
                let _ = sink.send(DiscoveryEvent::ServicesDiscovered { trans_id, records });
                SearchStatus::Completed
            };
            hub.search_outstanding.store(false, Ordering::SeqCst);
            let _ = sink.send(DiscoveryEvent::SearchCompleted { trans_id, status });
        });
        Ok(trans_id)
    }

    async fn open(&self, record: &ServiceRecord) -> Result<DuplexStream, TransportError> {
        let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
        let devices = lock(&self.hub.devices);
        let name = devices.get(&self.addr).map(|d| d.name.clone());
        let host = devices
            .get(&record.addr)
            .and_then(|d| d.services.get(&record.service))
            .ok_or_else(|| TransportError::Rejected(format!("no service on {}", record.addr)))?;
        host.send(Inbound {
            stream: theirs,
            addr: self.addr.clone(),
            name,
        })
        .map_err(|_| TransportError::Closed)?;
        Ok(ours)
    }
}

pub struct MemHost {
    rx: mpsc::UnboundedReceiver<Inbound<DuplexStream>>,
}

#[async_trait]
impl ServiceHost for MemHost {
    type Stream = DuplexStream;

    async fn accept(&mut self) -> Result<Inbound<DuplexStream>, TransportError> {
        self.rx.recv().await.ok_or(TransportError::Closed)
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}
