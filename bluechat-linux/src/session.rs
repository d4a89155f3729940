//! Concurrent session handle: the core `PeerSession` behind a lock, plus the wake-ups and
//! stop signal its Reader/Sender pair waits on.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bluechat_core::{
    Action, Frame, Peer, PeerAddr, PeerSession, SessionError, SessionState, Signal,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::events::EventSink;
use crate::registry::Registry;
use crate::transport::TransactionId;
use crate::{reader, sender};

/// What every worker needs besides its own session.
#[derive(Debug, Clone)]
pub struct Shared {
    pub registry: Arc<Registry>,
    pub events: EventSink,
    /// Longest the Sender sleeps on an empty queue before re-checking its stop signal.
    pub send_interval: Duration,
}

#[derive(Debug)]
pub struct Session {
    addr: PeerAddr,
    inner: Mutex<PeerSession>,
    wake: Notify,
    acked: Notify,
    stop: CancellationToken,
    search: Mutex<Option<TransactionId>>,
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    /// Outbound session for a discovered device; no stream yet.
    pub fn pending(addr: PeerAddr, friendly_name: Option<String>, local_name: &str) -> Arc<Self> {
        Self::wrap(PeerSession::pending(addr, friendly_name, local_name))
    }

    /// Inbound session for an accepted stream.
    pub fn inbound(addr: PeerAddr, friendly_name: Option<String>, local_name: &str) -> Arc<Self> {
        Self::wrap(PeerSession::inbound(addr, friendly_name, local_name))
    }

    fn wrap(inner: PeerSession) -> Arc<Self> {
        Arc::new(Self {
            addr: inner.addr().clone(),
            inner: Mutex::new(inner),
            wake: Notify::new(),
            acked: Notify::new(),
            stop: CancellationToken::new(),
            search: Mutex::new(None),
        })
    }

    pub fn addr(&self) -> &PeerAddr {
        &self.addr
    }

    pub fn remote_name(&self) -> String {
        lock(&self.inner).remote_name().to_string()
    }

    pub fn peer(&self) -> Peer {
        lock(&self.inner).peer()
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner).state()
    }

    pub fn transition(&self, next: SessionState) -> Result<(), SessionError> {
        lock(&self.inner).transition(next)
    }

    /// Queue a frame and wake the Sender. Never waits on I/O.
    pub fn enqueue(&self, signal: Signal, text: impl Into<String>) {
        lock(&self.inner).enqueue(signal, text);
        self.wake.notify_one();
    }

    pub fn dequeue_if_any(&self) -> Option<Frame> {
        lock(&self.inner).dequeue_if_any()
    }

    pub fn has_pending(&self) -> bool {
        lock(&self.inner).has_pending()
    }

    /// Queue a TERMINATE and move to `Terminating`.
    pub fn terminate(&self) -> Result<(), SessionError> {
        lock(&self.inner).terminate()?;
        self.wake.notify_one();
        Ok(())
    }

    /// Apply an inbound frame; wakes the Sender if an ack was queued.
    pub fn on_frame(&self, frame: Frame) -> Vec<Action> {
        let (actions, pending) = {
            let mut inner = lock(&self.inner);
            let actions = inner.on_frame(frame);
            (actions, inner.has_pending())
        };
        if pending {
            self.wake.notify_one();
        }
        actions
    }

    /// Resolves after the next enqueue (or immediately if one happened since the last wait).
    pub async fn notified(&self) {
        self.wake.notified().await
    }

    /// Mark closed and signal both workers to stop.
    pub fn close(&self) {
        {
            let mut inner = lock(&self.inner);
            if inner.state() != SessionState::Closed {
                // Every live state may close.
                let _ = inner.transition(SessionState::Closed);
            }
        }
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub async fn stopped(&self) {
        self.stop.cancelled().await
    }

    pub fn ack_terminate(&self) {
        self.acked.notify_one();
    }

    /// Resolves once the peer acknowledged our TERMINATE.
    pub async fn terminate_acked(&self) {
        self.acked.notified().await
    }

    pub fn search(&self) -> Option<TransactionId> {
        *lock(&self.search)
    }

    pub fn set_search(&self, trans_id: Option<TransactionId>) {
        *lock(&self.search) = trans_id;
    }
}

/// Split `stream` and start the Reader/Sender pair for `session`.
pub fn spawn_workers<S>(session: &Arc<Session>, stream: S, shared: &Shared)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read, write) = tokio::io::split(stream);
    tokio::spawn(sender::run_sender(session.clone(), write, shared.clone()));
    tokio::spawn(reader::run_reader(session.clone(), read, shared.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_wakes_a_waiting_sender() {
        let s = Session::inbound(PeerAddr::new("p"), None, "Bob");
        let waiter = {
            let s = s.clone();
            tokio::spawn(async move { s.notified().await })
        };
        tokio::task::yield_now().await;
        s.enqueue(Signal::Message, "hi");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(s.dequeue_if_any().unwrap().text, "hi");
    }

    #[tokio::test]
    async fn wake_before_wait_is_not_lost() {
        let s = Session::inbound(PeerAddr::new("p"), None, "Bob");
        s.enqueue(Signal::Message, "early");
        tokio::time::timeout(Duration::from_secs(1), s.notified())
            .await
            .unwrap();
    }

    #[test]
    fn close_is_idempotent_and_stops() {
        let s = Session::pending(PeerAddr::new("p"), Some("phone".into()), "Bob");
        assert_eq!(s.remote_name(), "phone");
        s.close();
        s.close();
        assert_eq!(s.state(), SessionState::Closed);
        assert!(s.is_stopped());
    }

    #[test]
    fn search_correlation_is_cleared() {
        let s = Session::pending(PeerAddr::new("p"), None, "Bob");
        s.set_search(Some(7));
        assert_eq!(s.search(), Some(7));
        s.set_search(None);
        assert_eq!(s.search(), None);
    }
}
