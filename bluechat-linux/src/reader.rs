//! Reader worker: decodes inbound frames for one session and turns them into events.

use std::sync::Arc;

use bluechat_core::{Action, Component};
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::framing::FrameCodec;
use crate::session::{Session, Shared};

/// Read until TERMINATE, stream failure, or the session's stop signal. The stream itself is
/// closed by the Sender; on every exit path the session leaves the registry.
pub async fn run_reader<R>(session: Arc<Session>, read: R, shared: Shared)
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(read, FrameCodec);
    let events = &shared.events;
    loop {
        let next = tokio::select! {
            _ = session.stopped() => break,
            next = frames.next() => next,
        };
        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                tracing::warn!(peer = %session.addr(), error = %e, "read failed");
                events.note(Component::Reader, format!("read failed: {e}"));
                break;
            }
            None => {
                events.note(
                    Component::Reader,
                    format!("stream from {} closed", session.remote_name()),
                );
                break;
            }
        };
        events.note(
            Component::Reader,
            format!(
                "read {} '{}' from {}",
                frame.signal,
                frame.text,
                session.remote_name()
            ),
        );
        let mut done = false;
        for action in session.on_frame(frame) {
            match action {
                Action::Emit(event) => events.emit(event),
                Action::Close => {
                    shared.registry.remove(&session);
                    done = true;
                }
                Action::TerminateAcked => session.ack_terminate(),
                Action::Unrecognized(code) => {
                    tracing::warn!(peer = %session.addr(), code, "unknown signal, ignoring");
                    events.note(
                        Component::Reader,
                        format!("unknown signal {code}, probably connection closed"),
                    );
                }
            }
        }
        if done {
            break;
        }
    }
    shared.registry.remove(&session);
    events.note(
        Component::Reader,
        format!("reader exit for {}", session.remote_name()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventSink;
    use crate::registry::Registry;
    use crate::sender::run_sender;
    use bluechat_core::{ChatEvent, Frame, PeerAddr, SessionState, Signal};
    use futures_util::SinkExt;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio_util::codec::FramedWrite;

    const WAIT: Duration = Duration::from_secs(2);

    struct Harness {
        session: Arc<Session>,
        registry: Arc<Registry>,
        events: UnboundedReceiver<ChatEvent>,
        remote_tx: FramedWrite<tokio::io::WriteHalf<tokio::io::DuplexStream>, FrameCodec>,
        remote_rx: FramedRead<tokio::io::ReadHalf<tokio::io::DuplexStream>, FrameCodec>,
    }

    /// Active session "Bob" wired to one end of a duplex pipe, both workers running.
    fn harness() -> Harness {
        let (local, remote) = tokio::io::duplex(4096);
        let registry = Arc::new(Registry::new());
        let (events_tx, events) = EventSink::channel(false);
        let shared = Shared {
            registry: registry.clone(),
            events: events_tx,
            send_interval: Duration::from_millis(50),
        };
        let session = Session::inbound(PeerAddr::new("alice-dev"), None, "Bob");
        registry.insert_active(session.clone()).unwrap();
        let (read, write) = tokio::io::split(local);
        tokio::spawn(run_sender(session.clone(), write, shared.clone()));
        tokio::spawn(run_reader(session.clone(), read, shared));
        let (r, w) = tokio::io::split(remote);
        Harness {
            session,
            registry,
            events,
            remote_tx: FramedWrite::new(w, FrameCodec),
            remote_rx: FramedRead::new(r, FrameCodec),
        }
    }

    async fn next_event(h: &mut Harness) -> ChatEvent {
        tokio::time::timeout(WAIT, h.events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    async fn next_frame(h: &mut Harness) -> Frame {
        tokio::time::timeout(WAIT, h.remote_rx.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn handshake_names_peer_acks_and_joins_once() {
        let mut h = harness();
        h.remote_tx
            .send(Frame::new(Signal::Handshake, "Alice"))
            .await
            .unwrap();

        match next_event(&mut h).await {
            ChatEvent::PeerJoined(peer) => assert_eq!(peer.name, "Alice"),
            other => panic!("expected PeerJoined, got {other:?}"),
        }
        assert_eq!(h.session.remote_name(), "Alice");
        let ack = next_frame(&mut h).await;
        assert_eq!(ack.signal, Signal::HandshakeAck);
        assert_eq!(ack.text, "Bob");

        // Nothing else queued or emitted.
        h.remote_tx
            .send(Frame::new(Signal::Message, "after"))
            .await
            .unwrap();
        assert!(matches!(
            next_event(&mut h).await,
            ChatEvent::MessageReceived { ref text, .. } if text == "after"
        ));
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn terminate_acks_leaves_and_unregisters() {
        let mut h = harness();
        h.remote_tx
            .send(Frame::new(Signal::HandshakeAck, "Alice"))
            .await
            .unwrap();
        h.remote_tx
            .send(Frame::control(Signal::Terminate))
            .await
            .unwrap();

        match next_event(&mut h).await {
            ChatEvent::PeerLeft(peer) => assert_eq!(peer.name, "Alice"),
            other => panic!("expected PeerLeft, got {other:?}"),
        }
        let ack = next_frame(&mut h).await;
        assert_eq!(ack.signal, Signal::TerminateAck);
        // Sender drains the ack, then shuts its half down.
        assert!(tokio::time::timeout(WAIT, h.remote_rx.next())
            .await
            .unwrap()
            .is_none());
        assert!(h.registry.is_empty());
        assert_eq!(h.session.state(), SessionState::Closed);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_signal_does_not_end_the_session() {
        let mut h = harness();
        h.remote_tx
            .send(Frame::new(Signal::Unknown(99), "junk"))
            .await
            .unwrap();
        h.remote_tx
            .send(Frame::new(Signal::Message, "still here"))
            .await
            .unwrap();
        match next_event(&mut h).await {
            ChatEvent::MessageReceived { text, .. } => assert_eq!(text, "still here"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.registry.len(), 1);
    }

    #[tokio::test]
    async fn closed_stream_unregisters_without_event() {
        let h = harness();
        let Harness {
            session,
            registry,
            mut events,
            remote_tx,
            remote_rx,
        } = h;
        drop(remote_tx);
        drop(remote_rx);
        tokio::time::timeout(WAIT, session.stopped()).await.unwrap();
        assert!(registry.is_empty());
        assert!(events.try_recv().is_err());
    }
}
