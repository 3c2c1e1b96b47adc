//! Row-level CRUD for [`Message`] records.
//!
//! These helpers do no authorization; ownership rules live in
//! [`MessageStore`](crate::MessageStore).

use chrono::{DateTime, SecondsFormat, Utc};
use parley_shared::{Attachment, AttachmentKind, AttachmentMetadata, Message, MessageId, UserId};
use rusqlite::{params, params_from_iter};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};

const MESSAGE_COLUMNS: &str = "id, sender_id, recipient_id, content, attachment_url, \
     attachment_type, attachment_metadata, read, created_at";

/// Fixed-width RFC-3339 so lexical order in SQLite equals time order.
pub(crate) fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        let (url, kind, metadata) = match &message.attachment {
            Some(a) => (
                Some(a.url.as_str()),
                Some(a.kind.as_str()),
                Some(
                    serde_json::to_string(&a.metadata)
                        .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                ),
            ),
            None => (None, None, None),
        };

        self.conn().execute(
            "INSERT INTO messages (id, sender_id, recipient_id, content, attachment_url,
                                   attachment_type, attachment_metadata, read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id.to_string(),
                message.sender_id.as_str(),
                message.recipient_id.as_str(),
                message.content,
                url,
                kind,
                metadata,
                message.read as i32,
                encode_timestamp(&message.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Replace the text of a message. Attachment columns are never touched.
    pub fn update_content(&self, id: MessageId, content: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET content = ?1 WHERE id = ?2",
            params![content, id.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_message(&self, id: MessageId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM messages WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }

    /// Flip `read` to true for each id that is still unread. Returns the ids
    /// that actually changed.
    pub fn set_read(&self, ids: &[MessageId]) -> Result<Vec<MessageId>> {
        let mut changed = Vec::new();
        let mut stmt = self
            .conn()
            .prepare_cached("UPDATE messages SET read = 1 WHERE id = ?1 AND read = 0")?;
        for id in ids {
            if stmt.execute(params![id.to_string()])? > 0 {
                changed.push(*id);
            }
        }
        Ok(changed)
    }

    /// Unread messages from `sender` to `recipient`, oldest first.
    pub fn unread_ids(&self, sender: &UserId, recipient: &UserId) -> Result<Vec<MessageId>> {
        let mut stmt = self.conn().prepare(
            "SELECT id FROM messages
             WHERE sender_id = ?1 AND recipient_id = ?2 AND read = 0
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![sender.as_str(), recipient.as_str()], |row| {
            let id: String = row.get(0)?;
            parse_uuid(0, &id).map(MessageId)
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    pub fn count_unread(&self, viewer: &UserId, counterpart: &UserId) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE sender_id = ?1 AND recipient_id = ?2 AND read = 0",
            params![counterpart.as_str(), viewer.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// All messages between `a` and `b` in either direction, oldest first.
    pub fn list_between(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>> {
        self.query_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE (sender_id = ?1 AND recipient_id = ?2)
                    OR (sender_id = ?2 AND recipient_id = ?1)
                 ORDER BY created_at ASC, id ASC"
            ),
            &[a.as_str(), b.as_str()],
        )
    }

    /// Every message `viewer` sent or received, newest first.
    pub fn list_for_participant(&self, viewer: &UserId) -> Result<Vec<Message>> {
        self.query_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE sender_id = ?1 OR recipient_id = ?1
                 ORDER BY created_at DESC, id DESC"
            ),
            &[viewer.as_str()],
        )
    }

    /// Most recent creation timestamp in the log, if any.
    pub fn latest_created_at(&self) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> =
            self.conn()
                .query_row("SELECT MAX(created_at) FROM messages", [], |row| row.get(0))?;
        raw.map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(StoreError::from)
        })
        .transpose()
    }

    fn query_messages(&self, sql: &str, args: &[&str]) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

fn parse_uuid(idx: usize, s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn conversion_failure(idx: usize, reason: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(StoreError::Corrupt(reason)),
    )
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender_id: String = row.get(1)?;
    let recipient_id: String = row.get(2)?;
    let content: String = row.get(3)?;
    let attachment_url: Option<String> = row.get(4)?;
    let attachment_type: Option<String> = row.get(5)?;
    let attachment_metadata: Option<String> = row.get(6)?;
    let read_int: i64 = row.get(7)?;
    let ts_str: String = row.get(8)?;

    let id = parse_uuid(0, &id_str)?;

    let attachment = match (attachment_url, attachment_type) {
        (Some(url), Some(kind_str)) => {
            let kind = AttachmentKind::parse(&kind_str)
                .ok_or_else(|| conversion_failure(5, format!("unknown attachment type {kind_str}")))?;
            let metadata: AttachmentMetadata = match attachment_metadata {
                Some(json) => serde_json::from_str(&json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        6,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?,
                None => return Err(conversion_failure(6, "attachment metadata missing".into())),
            };
            Some(Attachment {
                url,
                kind,
                metadata,
            })
        }
        (None, None) => None,
        _ => {
            return Err(conversion_failure(
                4,
                "attachment url and type out of step".into(),
            ))
        }
    };

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id: MessageId(id),
        sender_id: UserId(sender_id),
        recipient_id: UserId(recipient_id),
        content,
        attachment,
        read: read_int != 0,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn message(sender: &str, recipient: &str, content: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: MessageId::new(),
            sender_id: sender.into(),
            recipient_id: recipient.into(),
            content: content.to_string(),
            attachment: None,
            read: false,
            created_at: at,
        }
    }

    #[test]
    fn insert_and_fetch() {
        let db = Database::open_in_memory().unwrap();
        let mut m = message("alice", "bob", "", Utc::now());
        m.attachment = Some(Attachment {
            url: "http://localhost/objects/alice/1-v.mp4".into(),
            kind: AttachmentKind::Video,
            metadata: AttachmentMetadata {
                file_name: "v.mp4".into(),
                file_size: 10_000_000,
                mime_type: "video/mp4".into(),
            },
        });
        db.insert_message(&m).unwrap();

        let fetched = db.get_message(m.id).unwrap();
        assert_eq!(fetched.attachment, m.attachment);
        assert_eq!(fetched.content, "");
        assert!(!fetched.read);
    }

    #[test]
    fn schema_rejects_empty_message() {
        let db = Database::open_in_memory().unwrap();
        let m = message("alice", "bob", "", Utc::now());
        assert!(matches!(db.insert_message(&m), Err(StoreError::Sqlite(_))));
    }

    #[test]
    fn list_between_orders_both_directions() {
        let db = Database::open_in_memory().unwrap();
        let t0 = Utc::now();
        let second = message("bob", "alice", "two", t0 + Duration::seconds(1));
        let first = message("alice", "bob", "one", t0);
        let other = message("alice", "carol", "elsewhere", t0);
        db.insert_message(&second).unwrap();
        db.insert_message(&first).unwrap();
        db.insert_message(&other).unwrap();

        let listed = db.list_between(&"bob".into(), &"alice".into()).unwrap();
        let contents: Vec<_> = listed.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);
    }

    #[test]
    fn equal_timestamps_break_ties_by_id() {
        let db = Database::open_in_memory().unwrap();
        let t0 = Utc::now();
        let mut a = message("alice", "bob", "a", t0);
        let mut b = message("bob", "alice", "b", t0);
        a.id = MessageId(Uuid::from_u128(2));
        b.id = MessageId(Uuid::from_u128(1));
        db.insert_message(&a).unwrap();
        db.insert_message(&b).unwrap();

        let listed = db.list_between(&"alice".into(), &"bob".into()).unwrap();
        assert_eq!(listed[0].id, b.id);
        assert_eq!(listed[1].id, a.id);
    }

    #[test]
    fn set_read_reports_only_flipped_rows() {
        let db = Database::open_in_memory().unwrap();
        let m = message("alice", "bob", "hi", Utc::now());
        db.insert_message(&m).unwrap();

        assert_eq!(db.set_read(&[m.id]).unwrap(), vec![m.id]);
        assert!(db.set_read(&[m.id]).unwrap().is_empty());
        assert!(db.set_read(&[MessageId::new()]).unwrap().is_empty());
        assert_eq!(db.count_unread(&"bob".into(), &"alice".into()).unwrap(), 0);
    }

    #[test]
    fn latest_created_at_tracks_max() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.latest_created_at().unwrap().is_none());

        let t0 = Utc::now();
        db.insert_message(&message("alice", "bob", "x", t0)).unwrap();
        db.insert_message(&message("alice", "bob", "y", t0 - Duration::hours(1)))
            .unwrap();
        let latest = db.latest_created_at().unwrap().unwrap();
        assert_eq!(latest.timestamp_micros(), t0.timestamp_micros());
    }
}
