use thiserror::Error;

/// Malformed message content or attachment descriptor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message must carry text, an attachment, or both")]
    EmptyMessage,

    #[error("Message content too long: {len} characters (max {max})")]
    ContentTooLong { len: usize, max: usize },

    #[error("Edited content must not be empty")]
    EmptyEdit,

    #[error("A message needs two distinct, non-empty participants")]
    InvalidParticipants,

    #[error("Invalid attachment: {0}")]
    InvalidAttachment(String),
}

/// Failure decoding a change feed envelope.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Envelope missing {0} record")]
    MissingRecord(&'static str),

    #[error("Invalid record field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}
