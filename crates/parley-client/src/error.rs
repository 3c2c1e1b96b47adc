use parley_shared::ValidationError;
use parley_store::StoreError;
use thiserror::Error;

/// Failure turning a local file into a stored object.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// The local file could not be read.
    #[error("Attachment unreadable: {0}")]
    Unreadable(String),

    /// Storage refused the object outright (bad key, size).
    #[error("Attachment rejected: {0}")]
    Rejected(String),

    /// Network or storage unavailable; safe to retry.
    #[error("Upload failed: {0}")]
    TransportFailure(String),
}

/// Errors surfaced by the messaging core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    // deliberately says nothing about which record or why
    #[error("permission denied")]
    PermissionDenied,

    #[error("message not found")]
    NotFound,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("a send is already in progress")]
    SendInFlight,

    #[error("invalid session state: {0}")]
    InvalidState(&'static str),

    #[error("session closed")]
    SessionClosed,
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::SendInFlight)
    }

    /// Text suitable for showing next to the composer.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(e) => e.to_string(),
            Self::PermissionDenied => "Permission denied".to_string(),
            Self::NotFound => "This message no longer exists".to_string(),
            Self::Transport(_) => "Something went wrong, please try again".to_string(),
            Self::SendInFlight => "Still sending the previous message".to_string(),
            Self::InvalidState(_) | Self::SessionClosed => {
                "This conversation is not open".to_string()
            }
        }
    }
}

impl From<StoreError> for ClientError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Self::NotFound,
            StoreError::PermissionDenied => Self::PermissionDenied,
            StoreError::Validation(v) => Self::Validation(v),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<UploadError> for ClientError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::Unreadable(msg) | UploadError::Rejected(msg) => {
                Self::Validation(ValidationError::InvalidAttachment(msg))
            }
            UploadError::TransportFailure(msg) => Self::Transport(msg),
        }
    }
}
