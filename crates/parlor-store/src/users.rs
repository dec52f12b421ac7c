use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use parlor_core::UserId;

use crate::database::Database;
use crate::error::StoreError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserRow {
    pub id: UserId,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: String,
}

const SELECT_USER: &str = "SELECT id, username, password_hash, created_at FROM users";

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: UserId::new(row.get(0)?),
        username: row.get(1)?,
        password_hash: row.get(2)?,
        created_at: row.get(3)?,
    })
}

pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a user. Fails with `Conflict` when the username is taken.
    #[instrument(skip(self, password_hash))]
    pub fn create(&self, username: &str, password_hash: &str) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO users (username, password_hash, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![username, password_hash, now],
            )
            .map_err(|e| match StoreError::from(e) {
                StoreError::Constraint(_) => {
                    StoreError::Conflict(format!("username {username} already taken"))
                }
                other => other,
            })?;

            Ok(UserRow {
                id: UserId::new(conn.last_insert_rowid()),
                username: username.to_string(),
                password_hash: password_hash.to_string(),
                created_at: now,
            })
        })
    }

    #[instrument(skip(self))]
    pub fn get_by_username(&self, username: &str) -> Result<Option<UserRow>, StoreError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(&format!("{SELECT_USER} WHERE username = ?1"), [username], map_user)
                .optional()?;
            Ok(row)
        })
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: UserId) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(&format!("{SELECT_USER} WHERE id = ?1"), [id.get()], map_user)
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
        })
    }

    /// Delete a user and, through the cascade, their messages.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn delete(&self, id: UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute("DELETE FROM users WHERE id = ?1", [id.get()])?;
            Ok(n > 0)
        })
    }
}
