//! Upward event sink handed to every engine part at construction.

use bluechat_core::{ChatEvent, Component};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ChatEvent>,
    debug: bool,
}

impl EventSink {
    /// New sink and the receiver the application drains. With `debug`, [`EventSink::note`]
    /// lines are mirrored as [`ChatEvent::Debug`].
    pub fn channel(debug: bool) -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, debug }, rx)
    }

    pub fn emit(&self, event: ChatEvent) {
        // Receiver gone means the application is shutting down.
        let _ = self.tx.send(event);
    }

    /// Log a component line and mirror it upward in debug mode.
    pub fn note(&self, component: Component, line: impl Into<String>) {
        let line = line.into();
        tracing::debug!(%component, "{}", line);
        if self.debug {
            self.emit(ChatEvent::Debug { component, line });
        }
    }
}
