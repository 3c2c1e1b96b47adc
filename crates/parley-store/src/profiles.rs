use std::collections::HashMap;

use chrono::Utc;
use parley_shared::UserId;
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;

impl Database {
    pub fn upsert_profile(&self, user: &UserId, display_name: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO profiles (user_id, display_name, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                display_name = excluded.display_name,
                updated_at = excluded.updated_at",
            params![user.as_str(), display_name, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Batch name lookup. Ids without a profile are simply absent from the
    /// returned map.
    pub fn resolve_names(&self, ids: &[UserId]) -> Result<HashMap<UserId, String>> {
        let mut stmt = self
            .conn()
            .prepare_cached("SELECT display_name FROM profiles WHERE user_id = ?1")?;

        let mut names = HashMap::with_capacity(ids.len());
        for id in ids {
            let mut rows = stmt.query(params![id.as_str()])?;
            if let Some(row) = rows.next()? {
                names.insert(id.clone(), row.get(0)?);
            }
        }
        Ok(names)
    }
}
