//! Identity directory: display metadata keyed by user id.

use bazaar_shared::protocol::UserSummary;
use bazaar_shared::UserId;
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{decode_ts, decode_user_id, encode_ts, now, User};

impl Database {
    /// Insert or update a user's display metadata. `created_at` is kept on
    /// update.
    pub fn upsert_user(
        &self,
        id: &UserId,
        display_name: Option<&str>,
        avatar_ref: Option<&str>,
    ) -> Result<User> {
        let ts = encode_ts(&now());
        self.conn().execute(
            "INSERT INTO users (id, display_name, avatar_ref, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                avatar_ref   = excluded.avatar_ref,
                updated_at   = excluded.updated_at",
            params![id.as_str(), display_name, avatar_ref, ts],
        )?;
        self.get_user(id)
    }

    /// Fetch a single user. Fails with [`StoreError::NotFound`] if absent.
    pub fn get_user(&self, id: &UserId) -> Result<User> {
        self.find_user(id)?.ok_or(StoreError::NotFound)
    }

    pub fn find_user(&self, id: &UserId) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                "SELECT id, display_name, avatar_ref, created_at, updated_at
                 FROM users WHERE id = ?1",
                params![id.as_str()],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// `resolveUser`: display metadata for any id. Unknown users resolve to
    /// an empty summary so enrichment never fails a chat operation.
    pub fn resolve_user(&self, id: &UserId) -> Result<UserSummary> {
        Ok(self
            .find_user(id)?
            .map(|u| u.summary())
            .unwrap_or_else(|| UserSummary::unknown(id.clone())))
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let created: String = row.get(3)?;
    let updated: String = row.get(4)?;

    Ok(User {
        id: decode_user_id(0, &id)?,
        display_name: row.get(1)?,
        avatar_ref: row.get(2)?,
        created_at: decode_ts(3, &created)?,
        updated_at: decode_ts(4, &updated)?,
    })
}
