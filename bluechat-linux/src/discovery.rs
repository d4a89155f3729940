//! Discovery coordinator: device inquiry, then one service search at a time over the pending
//! set, connecting to every peer that runs the chat service. The discovering side always
//! initiates the handshake.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bluechat_core::{ChatEvent, Component, ServiceId, SessionState, Signal};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::session::{spawn_workers, Session, Shared};
use crate::transport::{
    DiscoveryEvent, DiscoverySink, ServiceRecord, TransactionId, Transport, TransportError,
};

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("inquiry rejected: {0}")]
    Inquiry(#[source] TransportError),
    #[error("discovery interrupted by shutdown")]
    Shutdown,
}

/// Outcome of one discovery cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub discovered: usize,
    pub searched: usize,
    pub connected: usize,
    pub dropped: usize,
}

/// Links in-flight service searches to the pending session they were issued for.
/// Emptied as each transaction resolves.
#[derive(Debug, Default)]
struct SearchTable {
    entries: HashMap<TransactionId, Arc<Session>>,
}

impl SearchTable {
    fn open(&mut self, trans_id: TransactionId, session: &Arc<Session>) {
        session.set_search(Some(trans_id));
        self.entries.insert(trans_id, session.clone());
    }

    fn get(&self, trans_id: TransactionId) -> Option<&Arc<Session>> {
        self.entries.get(&trans_id)
    }

    fn resolve(&mut self, trans_id: TransactionId) {
        if let Some(session) = self.entries.remove(&trans_id) {
            session.set_search(None);
        }
    }
}

pub struct Coordinator<T: Transport> {
    transport: Arc<T>,
    shared: Shared,
    service: ServiceId,
    local_name: String,
    settle_delay: Duration,
    shutdown: CancellationToken,
    cycle: tokio::sync::Mutex<()>,
}

impl<T: Transport> Coordinator<T> {
    pub fn new(
        transport: Arc<T>,
        shared: Shared,
        service: ServiceId,
        local_name: &str,
        settle_delay: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            transport,
            shared,
            service,
            local_name: local_name.to_string(),
            settle_delay,
            shutdown,
            cycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Run one full inquiry + search cycle. Cycles never overlap.
    pub async fn run_cycle(&self) -> Result<CycleReport, DiscoveryError> {
        let _cycle = self.cycle.lock().await;
        let events = &self.shared.events;
        let (sink, mut rx) = mpsc::unbounded_channel();
        let mut report = CycleReport {
            discovered: self.inquire(sink.clone(), &mut rx).await?,
            ..CycleReport::default()
        };

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(DiscoveryError::Shutdown),
            _ = tokio::time::sleep(self.settle_delay) => {}
        }

        let mut table = SearchTable::default();
        for session in self.shared.registry.pending() {
            let Some(records) = self.search(&session, &sink, &mut rx, &mut table).await? else {
                continue;
            };
            report.searched += 1;
            if self.connect(&session, records).await {
                report.connected += 1;
            }
        }

        report.dropped = self.shared.registry.clear_pending();
        events.note(
            Component::Net,
            format!(
                "discovery done: {} found, {} connected, {} dropped",
                report.discovered, report.connected, report.dropped
            ),
        );
        events.emit(ChatEvent::Ready);
        Ok(report)
    }

    /// Inquiry phase: every new device becomes a pending session.
    async fn inquire(
        &self,
        sink: DiscoverySink,
        rx: &mut mpsc::UnboundedReceiver<DiscoveryEvent>,
    ) -> Result<usize, DiscoveryError> {
        let events = &self.shared.events;
        if let Err(e) = self.transport.start_inquiry(sink) {
            tracing::warn!(error = %e, "inquiry rejected, abandoning discovery");
            events.note(Component::Net, format!("inquiry rejected: {e}"));
            return Err(DiscoveryError::Inquiry(e));
        }
        let mut discovered = 0;
        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(DiscoveryError::Shutdown),
                event = rx.recv() => event,
            };
            match event {
                Some(DiscoveryEvent::DeviceDiscovered(device)) => {
                    events.note(
                        Component::Net,
                        format!(
                            "device discovered: {} {}",
                            device.addr,
                            device.name.as_deref().unwrap_or("")
                        ),
                    );
                    let session = Session::pending(device.addr, device.name, &self.local_name);
                    if self.shared.registry.add_pending(session) {
                        discovered += 1;
                    }
                }
                Some(DiscoveryEvent::InquiryCompleted) | None => break,
                Some(other) => tracing::debug!(?other, "ignoring event during inquiry"),
            }
        }
        Ok(discovered)
    }

    /// Issue one service search and wait for its completion. `None` if the transport
    /// refused the search.
    async fn search(
        &self,
        session: &Arc<Session>,
        sink: &DiscoverySink,
        rx: &mut mpsc::UnboundedReceiver<DiscoveryEvent>,
        table: &mut SearchTable,
    ) -> Result<Option<Vec<ServiceRecord>>, DiscoveryError> {
        let events = &self.shared.events;
        events.note(
            Component::Net,
            format!("search service on device {}", session.remote_name()),
        );
        let trans_id = match self
            .transport
            .search_services(&self.service, session.addr(), sink.clone())
        {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(peer = %session.addr(), error = %e, "service search rejected");
                events.note(Component::Net, format!("search rejected: {e}"));
                return Ok(None);
            }
        };
        table.open(trans_id, session);

        let mut found = Vec::new();
        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    table.resolve(trans_id);
                    return Err(DiscoveryError::Shutdown);
                }
                event = rx.recv() => event,
            };
            match event {
                Some(DiscoveryEvent::ServicesDiscovered { trans_id: t, records }) => {
                    if table.get(t).is_some() {
                        events.note(
                            Component::Net,
                            format!("services discovered: {t}, {}", records.len()),
                        );
                        found.extend(records);
                    } else {
                        tracing::debug!(trans_id = t, "records for unknown search, ignoring");
                    }
                }
                Some(DiscoveryEvent::SearchCompleted { trans_id: t, status }) if t == trans_id => {
                    events.note(Component::Net, format!("search {t} completed: {status}"));
                    break;
                }
                Some(other) => tracing::debug!(?other, "stale discovery event"),
                None => break,
            }
        }
        table.resolve(trans_id);
        Ok(Some(found))
    }

    /// Open a stream to the first usable record and activate the session as initiator.
    async fn connect(&self, session: &Arc<Session>, records: Vec<ServiceRecord>) -> bool {
        let events = &self.shared.events;
        let registry = &self.shared.registry;
        if records.is_empty() {
            return false;
        }
        if registry.contains_active(session.addr()) {
            events.note(
                Component::Net,
                format!("{} already connected, ignoring service", session.addr()),
            );
            return false;
        }
        if session.transition(SessionState::Connecting).is_err() {
            return false;
        }
        for record in records {
            events.note(
                Component::Net,
                format!("chat service url={}", record.endpoint),
            );
            let stream = match self.transport.open(&record).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(peer = %session.addr(), error = %e, "open failed");
                    events.note(Component::Net, format!("open failed: {e}"));
                    continue;
                }
            };
            if let Err(e) = registry.promote(session) {
                events.note(Component::Net, format!("dropping new stream: {e}"));
                session.close();
                return false;
            }
            if let Err(e) = session.transition(SessionState::Active) {
                tracing::warn!(peer = %session.addr(), error = %e, "cannot activate session");
                registry.remove(session);
                return false;
            }
            spawn_workers(session, stream, &self.shared);
            tracing::info!(peer = %session.addr(), name = %session.remote_name(), "session established");
            session.enqueue(Signal::Handshake, self.local_name.clone());
            return true;
        }
        session.close();
        false
    }
}
