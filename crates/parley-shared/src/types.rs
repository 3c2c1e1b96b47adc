use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{
    PREVIEW_DOCUMENT, PREVIEW_FALLBACK, PREVIEW_IMAGE, PREVIEW_VIDEO,
};

// Stable user identifier handed out by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category of an uploaded attachment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
    Document,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Document => "document",
        }
    }

    /// Lenient parse used at storage and wire boundaries.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" | "photo" => Some(Self::Image),
            "video" => Some(Self::Video),
            "document" | "file" => Some(Self::Document),
            _ => None,
        }
    }

    /// Placeholder shown in conversation previews when a message has no text.
    pub fn placeholder(&self) -> &'static str {
        match self {
            Self::Image => PREVIEW_IMAGE,
            Self::Video => PREVIEW_VIDEO,
            Self::Document => PREVIEW_DOCUMENT,
        }
    }
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentMetadata {
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
}

/// A stored, publicly addressable attachment. Produced by an upload and
/// immutable once attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub kind: AttachmentKind,
    pub metadata: AttachmentMetadata,
}

/// A single direct message between two users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub content: String,
    pub attachment: Option<Attachment>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Whether this message belongs to the conversation between `a` and `b`,
    /// in either direction.
    pub fn is_between(&self, a: &UserId, b: &UserId) -> bool {
        (&self.sender_id == a && &self.recipient_id == b)
            || (&self.sender_id == b && &self.recipient_id == a)
    }

    /// The other participant relative to `viewer`, if `viewer` takes part.
    pub fn counterpart_of(&self, viewer: &UserId) -> Option<&UserId> {
        if &self.sender_id == viewer {
            Some(&self.recipient_id)
        } else if &self.recipient_id == viewer {
            Some(&self.sender_id)
        } else {
            None
        }
    }

    pub fn is_unread_for(&self, viewer: &UserId) -> bool {
        &self.recipient_id == viewer && !self.read
    }

    pub fn preview(&self) -> String {
        if !self.content.is_empty() {
            return self.content.clone();
        }
        match &self.attachment {
            Some(a) => a.kind.placeholder().to_string(),
            None => PREVIEW_FALLBACK.to_string(),
        }
    }

    /// Ordering key within a conversation.
    pub fn sort_key(&self) -> (DateTime<Utc>, MessageId) {
        (self.created_at, self.id)
    }
}

/// Derived per-counterpart summary; never persisted.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Conversation {
    pub counterpart_id: UserId,
    pub counterpart_name: String,
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
    pub unread_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(sender: &str, recipient: &str, content: &str) -> Message {
        Message {
            id: MessageId::new(),
            sender_id: sender.into(),
            recipient_id: recipient.into(),
            content: content.to_string(),
            attachment: None,
            read: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn is_between_is_symmetric() {
        let m = message("alice", "bob", "hi");
        assert!(m.is_between(&"alice".into(), &"bob".into()));
        assert!(m.is_between(&"bob".into(), &"alice".into()));
        assert!(!m.is_between(&"alice".into(), &"carol".into()));
    }

    #[test]
    fn counterpart_resolution() {
        let m = message("alice", "bob", "hi");
        assert_eq!(m.counterpart_of(&"alice".into()), Some(&UserId::from("bob")));
        assert_eq!(m.counterpart_of(&"bob".into()), Some(&UserId::from("alice")));
        assert_eq!(m.counterpart_of(&"carol".into()), None);
    }

    #[test]
    fn preview_uses_placeholder_for_attachment_only() {
        let mut m = message("alice", "bob", "");
        m.attachment = Some(Attachment {
            url: "http://x/a.png".into(),
            kind: AttachmentKind::Image,
            metadata: AttachmentMetadata {
                file_name: "a.png".into(),
                file_size: 3,
                mime_type: "image/png".into(),
            },
        });
        assert_eq!(m.preview(), "Photo");

        let bare = message("alice", "bob", "");
        assert_eq!(bare.preview(), "New message");
    }

    #[test]
    fn attachment_kind_parse_is_lenient() {
        assert_eq!(AttachmentKind::parse(" IMAGE "), Some(AttachmentKind::Image));
        assert_eq!(AttachmentKind::parse("photo"), Some(AttachmentKind::Image));
        assert_eq!(AttachmentKind::parse("file"), Some(AttachmentKind::Document));
        assert_eq!(AttachmentKind::parse("audio"), None);
    }
}
