//! # parley-shared
//!
//! Domain types, content rules and the change feed wire format shared by
//! the Parley store, client and server crates.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;
pub mod validation;

pub use error::{ProtocolError, ValidationError};
pub use protocol::{ChangeEnvelope, ChangeEvent, ChangeKind, MessageRecord};
pub use types::{
    Attachment, AttachmentKind, AttachmentMetadata, Conversation, Message, MessageId, UserId,
};
