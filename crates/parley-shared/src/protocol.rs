//! Change feed wire format.
//!
//! The feed is scoped to the whole message table and carries rows in a
//! loosely typed form: `read` may arrive as a bool, a 0/1 integer or a
//! `"t"`/`"f"` string depending on the backend, and attachment types are
//! free text. Everything is normalized here so the rest of the client only
//! ever sees a well-formed [`Message`].

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::types::{Attachment, AttachmentKind, AttachmentMetadata, Message, MessageId, UserId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A message row as it travels on the feed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MessageRecord {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachment_url: Option<String>,
    #[serde(default)]
    pub attachment_type: Option<String>,
    #[serde(default)]
    pub attachment_metadata: Option<Value>,
    #[serde(default)]
    pub read: Value,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// `{event, old?, new?}` notification published for every committed mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEnvelope {
    pub event: ChangeKind,
    #[serde(default)]
    pub old: Option<MessageRecord>,
    #[serde(default)]
    pub new: Option<MessageRecord>,
}

/// A decoded, normalized change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Insert(Message),
    Update(Message),
    Delete {
        id: MessageId,
        sender_id: UserId,
        recipient_id: UserId,
    },
}

impl ChangeEvent {
    pub fn id(&self) -> MessageId {
        match self {
            Self::Insert(m) | Self::Update(m) => m.id,
            Self::Delete { id, .. } => *id,
        }
    }

    /// Whether the change touches the conversation between `a` and `b`.
    pub fn is_between(&self, a: &UserId, b: &UserId) -> bool {
        match self {
            Self::Insert(m) | Self::Update(m) => m.is_between(a, b),
            Self::Delete {
                sender_id,
                recipient_id,
                ..
            } => (sender_id == a && recipient_id == b) || (sender_id == b && recipient_id == a),
        }
    }
}

impl From<&Message> for MessageRecord {
    fn from(m: &Message) -> Self {
        let (attachment_url, attachment_type, attachment_metadata) = match &m.attachment {
            Some(a) => (
                Some(a.url.clone()),
                Some(a.kind.as_str().to_string()),
                serde_json::to_value(&a.metadata).ok(),
            ),
            None => (None, None, None),
        };
        Self {
            id: m.id.to_string(),
            sender_id: m.sender_id.0.clone(),
            recipient_id: m.recipient_id.0.clone(),
            content: Some(m.content.clone()),
            attachment_url,
            attachment_type,
            attachment_metadata,
            read: Value::Bool(m.read),
            created_at: Some(m.created_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
        }
    }
}

impl ChangeEnvelope {
    pub fn insert(message: &Message) -> Self {
        Self {
            event: ChangeKind::Insert,
            old: None,
            new: Some(message.into()),
        }
    }

    pub fn update(old: &Message, new: &Message) -> Self {
        Self {
            event: ChangeKind::Update,
            old: Some(old.into()),
            new: Some(new.into()),
        }
    }

    pub fn delete(old: &Message) -> Self {
        Self {
            event: ChangeKind::Delete,
            old: Some(old.into()),
            new: None,
        }
    }

    /// Normalize into a [`ChangeEvent`].
    pub fn decode(&self) -> Result<ChangeEvent, ProtocolError> {
        match self.event {
            ChangeKind::Insert => {
                let rec = self.new.as_ref().ok_or(ProtocolError::MissingRecord("new"))?;
                Ok(ChangeEvent::Insert(rec.to_message()?))
            }
            ChangeKind::Update => {
                let rec = self.new.as_ref().ok_or(ProtocolError::MissingRecord("new"))?;
                Ok(ChangeEvent::Update(rec.to_message()?))
            }
            ChangeKind::Delete => {
                let rec = self.old.as_ref().ok_or(ProtocolError::MissingRecord("old"))?;
                Ok(ChangeEvent::Delete {
                    id: parse_id(&rec.id)?,
                    sender_id: parse_user("sender_id", &rec.sender_id)?,
                    recipient_id: parse_user("recipient_id", &rec.recipient_id)?,
                })
            }
        }
    }
}

impl MessageRecord {
    pub fn to_message(&self) -> Result<Message, ProtocolError> {
        let created_at = match &self.created_at {
            Some(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| invalid("created_at", e))?,
            None => return Err(invalid("created_at", "missing")),
        };

        let attachment = match (&self.attachment_url, &self.attachment_type) {
            (None, None) => None,
            (Some(url), Some(kind)) => {
                let kind = AttachmentKind::parse(kind)
                    .ok_or_else(|| invalid("attachment_type", format!("unknown type {kind:?}")))?;
                Some(Attachment {
                    url: url.clone(),
                    kind,
                    metadata: parse_metadata(self.attachment_metadata.as_ref())?,
                })
            }
            _ => {
                return Err(invalid(
                    "attachment_type",
                    "attachment url and type must both be present or both absent",
                ))
            }
        };

        Ok(Message {
            id: parse_id(&self.id)?,
            sender_id: parse_user("sender_id", &self.sender_id)?,
            recipient_id: parse_user("recipient_id", &self.recipient_id)?,
            content: self.content.clone().unwrap_or_default(),
            attachment,
            read: normalize_bool("read", &self.read)?,
            created_at,
        })
    }
}

/// Accepts native booleans, 0/1 and the usual textual spellings.
pub fn normalize_bool(field: &'static str, value: &Value) -> Result<bool, ProtocolError> {
    match value {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(invalid(field, format!("not a boolean: {n}"))),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "t" | "true" | "1" | "yes" => Ok(true),
            "f" | "false" | "0" | "no" | "" => Ok(false),
            other => Err(invalid(field, format!("not a boolean: {other:?}"))),
        },
        other => Err(invalid(field, format!("not a boolean: {other}"))),
    }
}

fn parse_metadata(value: Option<&Value>) -> Result<AttachmentMetadata, ProtocolError> {
    let obj = match value {
        Some(Value::Object(obj)) => obj,
        Some(Value::String(s)) => {
            // some backends ship json columns as text
            let parsed: Value =
                serde_json::from_str(s).map_err(|e| invalid("attachment_metadata", e))?;
            return parse_metadata(Some(&parsed));
        }
        _ => return Err(invalid("attachment_metadata", "missing")),
    };

    let text = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default()
    };
    let file_size = match obj.get("file_size") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| invalid("attachment_metadata", "file_size is not a size"))?;

    Ok(AttachmentMetadata {
        file_name: text("file_name"),
        file_size,
        mime_type: text("mime_type"),
    })
}

fn parse_id(s: &str) -> Result<MessageId, ProtocolError> {
    Uuid::parse_str(s.trim())
        .map(MessageId)
        .map_err(|e| invalid("id", e))
}

fn parse_user(field: &'static str, s: &str) -> Result<UserId, ProtocolError> {
    if s.trim().is_empty() {
        return Err(invalid(field, "empty"));
    }
    Ok(UserId::new(s))
}

fn invalid(field: &'static str, reason: impl ToString) -> ProtocolError {
    ProtocolError::InvalidField {
        field,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Message {
        Message {
            id: MessageId::new(),
            sender_id: "alice".into(),
            recipient_id: "bob".into(),
            content: String::new(),
            attachment: Some(Attachment {
                url: "http://localhost:8080/objects/alice/1-cat.png".into(),
                kind: AttachmentKind::Image,
                metadata: AttachmentMetadata {
                    file_name: "cat.png".into(),
                    file_size: 2048,
                    mime_type: "image/png".into(),
                },
            }),
            read: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn envelope_survives_the_wire() {
        let msg = sample();
        let bytes = serde_json::to_vec(&ChangeEnvelope::insert(&msg)).unwrap();
        let envelope: ChangeEnvelope = serde_json::from_slice(&bytes).unwrap();
        let decoded = envelope.decode().unwrap();

        match decoded {
            ChangeEvent::Insert(m) => {
                assert_eq!(m.id, msg.id);
                assert_eq!(m.attachment, msg.attachment);
                assert!(m.read);
                // microsecond precision on the wire
                assert_eq!(m.created_at.timestamp_micros(), msg.created_at.timestamp_micros());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn read_flag_spellings_are_normalized() {
        assert!(normalize_bool("read", &json!("t")).unwrap());
        assert!(normalize_bool("read", &json!(1)).unwrap());
        assert!(!normalize_bool("read", &json!("false")).unwrap());
        assert!(!normalize_bool("read", &Value::Null).unwrap());
        assert!(normalize_bool("read", &json!(7)).is_err());
        assert!(normalize_bool("read", &json!("maybe")).is_err());
    }

    #[test]
    fn loose_row_decodes() {
        let raw = json!({
            "event": "update",
            "new": {
                "id": Uuid::new_v4().to_string(),
                "sender_id": "alice",
                "recipient_id": "bob",
                "content": null,
                "attachment_url": "http://x/doc.pdf",
                "attachment_type": "File",
                "attachment_metadata": "{\"file_name\":\"doc.pdf\",\"file_size\":\"12\",\"mime_type\":\"application/pdf\"}",
                "read": "f",
                "created_at": "2026-01-02T03:04:05.000006Z"
            }
        });
        let env: ChangeEnvelope = serde_json::from_value(raw).unwrap();
        let ChangeEvent::Update(m) = env.decode().unwrap() else {
            panic!("expected update");
        };
        assert_eq!(m.content, "");
        assert!(!m.read);
        let a = m.attachment.unwrap();
        assert_eq!(a.kind, AttachmentKind::Document);
        assert_eq!(a.metadata.file_size, 12);
    }

    #[test]
    fn half_attachment_rejected() {
        let mut rec = MessageRecord::from(&sample());
        rec.attachment_type = None;
        assert!(rec.to_message().is_err());
    }

    #[test]
    fn delete_needs_old_record() {
        let env = ChangeEnvelope {
            event: ChangeKind::Delete,
            old: None,
            new: None,
        };
        assert!(matches!(env.decode(), Err(ProtocolError::MissingRecord("old"))));

        let msg = sample();
        let ev = ChangeEnvelope::delete(&msg).decode().unwrap();
        assert_eq!(ev.id(), msg.id);
        assert!(ev.is_between(&"bob".into(), &"alice".into()));
    }
}
