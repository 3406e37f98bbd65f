//! Session lifecycle broadcast
//!
//! Decouples "session ended" detection from reaction: the request pipeline
//! publishes a logout event and any number of subscribers (typically the
//! application shell redirecting to the login screen) react to it.

use tokio::sync::broadcast;
use tracing::debug;

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// Token refresh was impossible or rejected; the session cannot recover.
    SessionExpired,
    /// The user explicitly logged out.
    UserLogout,
}

/// Events emitted over the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedOut { reason: LogoutReason },
}

/// Broadcaster for session lifecycle events.
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    /// Create a new broadcaster with default capacity (16).
    pub fn new() -> Self {
        Self::with_capacity(16)
    }

    /// Create a new broadcaster with specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publish a logout event. Lossy when nobody is subscribed.
    pub fn notify_logout(&self, reason: LogoutReason) {
        debug!(?reason, "Broadcasting session logout");
        let _ = self.sender.send(SessionEvent::LoggedOut { reason });
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SessionEvents {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
