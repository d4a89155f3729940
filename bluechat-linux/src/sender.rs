//! Sender worker: drains one session's outbound queue onto the stream, in order.

use std::sync::Arc;

use bluechat_core::{Component, Signal};
use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio_util::codec::FramedWrite;

use crate::framing::{CodecError, FrameCodec};
use crate::session::{Session, Shared};

/// Write queued frames until TERMINATE is sent, a write fails, or the session is stopped and
/// its queue is empty. A frame that cannot be encoded is dropped and the session carries on.
/// Always shuts the write half down on exit.
pub async fn run_sender<W>(session: Arc<Session>, write: W, shared: Shared)
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(write, FrameCodec);
    let events = &shared.events;
    loop {
        if !session.has_pending() {
            tokio::select! {
                _ = session.notified() => {}
                _ = tokio::time::sleep(shared.send_interval) => {}
                _ = session.stopped() => {}
            }
        }
        match session.dequeue_if_any() {
            Some(frame) => {
                let terminate = frame.signal == Signal::Terminate;
                events.note(
                    Component::Sender,
                    format!(
                        "sending {} '{}' to {}",
                        frame.signal,
                        frame.text,
                        session.remote_name()
                    ),
                );
                match sink.send(frame).await {
                    Ok(()) => {}
                    Err(CodecError::Encode(e)) => {
                        tracing::warn!(peer = %session.addr(), error = %e, "frame dropped");
                        events.note(Component::Sender, format!("frame dropped: {e}"));
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(peer = %session.addr(), error = %e, "write failed");
                        events.note(Component::Sender, format!("write failed: {e}"));
                        break;
                    }
                }
                if terminate {
                    break;
                }
            }
            None if session.is_stopped() => break,
            None => {}
        }
    }
    if let Err(e) = sink.close().await {
        tracing::debug!(peer = %session.addr(), error = %e, "closing stream");
    }
    events.note(
        Component::Sender,
        format!("sender exit for {}", session.remote_name()),
    );
}
