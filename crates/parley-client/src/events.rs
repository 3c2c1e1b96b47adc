use tokio::sync::broadcast;

use crate::error::ClientError;

pub const EVENT_CAPACITY: usize = 64;

/// Notifications a chat view listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The visible message list changed; re-read `messages()`.
    MessagesChanged,
    /// After an own send or an inbound message.
    ScrollToLatest,
    /// A background operation failed.
    Error { message: String, retryable: bool },
}

impl SessionEvent {
    pub fn from_error(error: &ClientError) -> Self {
        Self::Error {
            message: error.user_message(),
            retryable: error.is_retryable(),
        }
    }
}

pub fn emit_event(tx: &broadcast::Sender<SessionEvent>, event: SessionEvent) {
    if tx.send(event).is_err() {
        tracing::trace!("No session event listeners");
    }
}
