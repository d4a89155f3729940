//! Engine: the entry points the application calls. Owns the registry, the listener task and
//! the discovery coordinator for one local display name.

use std::sync::Arc;
use std::time::Duration;

use bluechat_core::{ChatEvent, Component, Peer, ServiceId, Signal, MAX_TEXT_LEN};
use tokio_util::sync::CancellationToken;

use crate::discovery::Coordinator;
use crate::events::EventSink;
use crate::listener::run_listener;
use crate::registry::Registry;
use crate::session::Shared;
use crate::transport::{Transport, TransportError};

/// Engine timing. Defaults: 5 s sender poll, 100 ms settle before searching, 5 s terminate grace.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub service: ServiceId,
    pub send_interval: Duration,
    pub settle_delay: Duration,
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            service: ServiceId::chat(),
            send_interval: Duration::from_secs(5),
            settle_delay: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("cannot advertise chat service: {0}")]
    Advertise(#[source] TransportError),
    #[error("message is {len} bytes, at most {max} fit in a frame")]
    TooLarge { len: usize, max: usize },
}

pub struct Engine<T: Transport> {
    local_name: String,
    shared: Shared,
    coordinator: Arc<Coordinator<T>>,
    shutdown: CancellationToken,
    shutdown_grace: Duration,
}

impl<T: Transport> Engine<T> {
    /// Advertise the chat service, start accepting, and run a first discovery cycle.
    pub async fn start(
        transport: T,
        config: EngineConfig,
        local_name: &str,
        events: EventSink,
    ) -> Result<Self, EngineError> {
        let transport = Arc::new(transport);
        let shared = Shared {
            registry: Arc::new(Registry::new()),
            events,
            send_interval: config.send_interval,
        };
        let shutdown = CancellationToken::new();
        shared
            .events
            .note(Component::Net, format!("starting as '{local_name}'"));

        let host = transport
            .advertise(&config.service)
            .await
            .map_err(EngineError::Advertise)?;
        tokio::spawn(run_listener(
            host,
            shared.clone(),
            local_name.to_string(),
            shutdown.clone(),
        ));

        let coordinator = Arc::new(Coordinator::new(
            transport,
            shared.clone(),
            config.service,
            local_name,
            config.settle_delay,
            shutdown.clone(),
        ));
        let engine = Self {
            local_name: local_name.to_string(),
            shared,
            coordinator,
            shutdown,
            shutdown_grace: config.shutdown_grace,
        };
        engine.discover();
        Ok(engine)
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// Run another discovery cycle in the background; waits for any running one first.
    pub fn discover(&self) {
        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            match coordinator.run_cycle().await {
                Ok(report) => tracing::info!(?report, "discovery cycle finished"),
                Err(e) => tracing::warn!(error = %e, "discovery cycle abandoned"),
            }
        });
    }

    /// Echo locally and queue a MESSAGE on every active session. Returns how many got it.
    /// Text too long for one frame is rejected before anything is echoed or queued.
    pub fn send_text(&self, text: &str) -> Result<usize, EngineError> {
        if text.len() > MAX_TEXT_LEN {
            return Err(EngineError::TooLarge {
                len: text.len(),
                max: MAX_TEXT_LEN,
            });
        }
        self.shared.events.emit(ChatEvent::MessageSent {
            text: text.to_string(),
        });
        let sessions = self.shared.registry.active();
        for session in &sessions {
            session.enqueue(Signal::Message, text);
        }
        Ok(sessions.len())
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.shared.registry.peers()
    }

    /// Stop accepting, send TERMINATE to every peer, and close each session once it acks or
    /// the grace period runs out. Calling it again does nothing.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        let events = &self.shared.events;
        let sessions = self.shared.registry.active();
        events.note(
            Component::Net,
            format!("disconnecting from {} peers", sessions.len()),
        );
        for session in &sessions {
            if let Err(e) = session.terminate() {
                tracing::debug!(peer = %session.addr(), error = %e, "not terminating");
            }
        }
        let grace = self.shutdown_grace;
        let waits = sessions.into_iter().map(|session| {
            let registry = self.shared.registry.clone();
            let events = events.clone();
            async move {
                if tokio::time::timeout(grace, session.terminate_acked())
                    .await
                    .is_err()
                {
                    events.note(
                        Component::Net,
                        format!("no TERMINATE_ACK from {}, closing", session.remote_name()),
                    );
                }
                registry.remove(&session);
            }
        });
        futures_util::future::join_all(waits).await;
    }
}
