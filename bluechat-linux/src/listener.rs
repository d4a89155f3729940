//! Listener: advertises the chat service and turns accepted streams into active sessions.
//! The accepting side only ever answers handshakes.

use bluechat_core::{ChatEvent, Component};
use tokio_util::sync::CancellationToken;

use crate::session::{spawn_workers, Session, Shared};
use crate::transport::{ServiceHost, TransportError};

/// Accept until `shutdown` fires or the host closes. Closing the host on shutdown stops
/// advertising and releases the accept socket.
pub async fn run_listener<H: ServiceHost>(
    mut host: H,
    shared: Shared,
    local_name: String,
    shutdown: CancellationToken,
) {
    let events = &shared.events;
    events.note(Component::Net, "local service waiting for client connection");
    events.emit(ChatEvent::Listening);
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = host.accept() => accepted,
        };
        let inbound = match accepted {
            Ok(inbound) => inbound,
            Err(TransportError::Closed) => break,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                events.note(Component::Net, format!("accept failed: {e}"));
                continue;
            }
        };
        if shared.registry.contains_active(&inbound.addr) {
            events.note(
                Component::Net,
                format!("{} already connected, dropping new stream", inbound.addr),
            );
            continue;
        }
        let session = Session::inbound(inbound.addr, inbound.name, &local_name);
        if let Err(e) = shared.registry.insert_active(session.clone()) {
            events.note(Component::Net, format!("dropping new stream: {e}"));
            continue;
        }
        spawn_workers(&session, inbound.stream, &shared);
        tracing::info!(peer = %session.addr(), name = %session.remote_name(), "session accepted");
    }
    host.close().await;
    events.note(Component::Net, "listener stopped");
}
