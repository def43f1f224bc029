//! Live relay channel.
//!
//! Browsers hold an SSE stream open; the session id handed out on connect is
//! carried through the work item's callback URL so callback progress can be
//! pushed back to the tab that started the job.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

/// A message pushed to a browser session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// First event of every stream, carrying the session id
    Connected(String),
    /// Status and report text
    OnComplete(String),
    /// Contents of a text output
    CountItResult(String),
    /// Signed URL of the output
    DownloadResult(String),
}

impl RelayMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            RelayMessage::Connected(_) => "connected",
            RelayMessage::OnComplete(_) => "onComplete",
            RelayMessage::CountItResult(_) => "countItResult",
            RelayMessage::DownloadResult(_) => "downloadResult",
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            RelayMessage::Connected(p)
            | RelayMessage::OnComplete(p)
            | RelayMessage::CountItResult(p)
            | RelayMessage::DownloadResult(p) => p,
        }
    }
}

/// Registry of connected browser sessions
#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<DashMap<String, UnboundedSender<RelayMessage>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session. It stays registered until the returned
    /// handle is dropped.
    pub fn connect(&self) -> RelaySession {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        // The receiver is alive, so this cannot fail.
        let _ = tx.send(RelayMessage::Connected(id.clone()));
        self.sessions.insert(id.clone(), tx);
        tracing::debug!(session = %id, "relay session connected");

        RelaySession {
            id,
            receiver: rx,
            manager: self.clone(),
        }
    }

    /// Push a message to a session. Returns `false` when nobody is listening.
    pub fn push(&self, session_id: &str, message: RelayMessage) -> bool {
        let delivered = match self.sessions.get(session_id) {
            Some(sender) => sender.send(message).is_ok(),
            None => {
                tracing::debug!(session = %session_id, "no relay session, dropping {}", message.event_name());
                return false;
            }
        };

        if !delivered {
            self.disconnect(session_id);
        }
        delivered
    }

    pub fn disconnect(&self, session_id: &str) {
        if self.sessions.remove(session_id).is_some() {
            tracing::debug!(session = %session_id, "relay session disconnected");
        }
    }

    #[cfg(test)]
    pub fn is_connected(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }
}

/// Receiving end of one browser session
pub struct RelaySession {
    id: String,
    receiver: UnboundedReceiver<RelayMessage>,
    manager: SessionManager,
}

impl RelaySession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn recv(&mut self) -> Option<RelayMessage> {
        self.receiver.recv().await
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        self.manager.disconnect(&self.id);
    }
}
