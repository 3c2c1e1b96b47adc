use rusqlite::Connection;

// Display names for the conversation list. Written by the identity side,
// only read by the core.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    user_id      TEXT PRIMARY KEY NOT NULL,
    display_name TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
