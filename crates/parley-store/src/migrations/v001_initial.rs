//! v001 -- Initial schema creation.
//!
//! Creates the `messages` table. The CHECK constraints mirror the domain
//! rules so a row that slips past application validation is still refused.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id                  TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    sender_id           TEXT NOT NULL,
    recipient_id        TEXT NOT NULL,
    content             TEXT NOT NULL DEFAULT '',
    attachment_url      TEXT,
    attachment_type     TEXT,                       -- image | video | document
    attachment_metadata TEXT,                       -- JSON {file_name, file_size, mime_type}
    read                INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    created_at          TEXT NOT NULL,              -- RFC-3339, fixed microsecond width

    CHECK (sender_id <> recipient_id),
    CHECK (read IN (0, 1)),
    CHECK ((attachment_url IS NULL) = (attachment_type IS NULL)),
    CHECK (attachment_type IS NULL OR attachment_type IN ('image', 'video', 'document')),
    CHECK (
        (length(content) BETWEEN 1 AND 1000)
        OR (attachment_url IS NOT NULL AND length(content) <= 1000)
    )
);

CREATE INDEX IF NOT EXISTS idx_messages_pair_ts
    ON messages(sender_id, recipient_id, created_at);

CREATE INDEX IF NOT EXISTS idx_messages_recipient_unread
    ON messages(recipient_id, read);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
