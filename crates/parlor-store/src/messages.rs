use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use tracing::instrument;

use parlor_core::{ChatError, Message, MessageId, MessageStore, UserId};

use crate::database::Database;
use crate::error::StoreError;

/// Append-only message table.
#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, content), fields(sender_id = %sender_id, len = content.len()))]
    pub fn insert(
        &self,
        sender_id: UserId,
        content: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<Message, StoreError> {
        // Stored with microsecond precision; trim first so the returned value matches a re-read.
        let timestamp = timestamp.unwrap_or_else(Utc::now).trunc_subsecs(6);
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (sender_id, content, timestamp) VALUES (?1, ?2, ?3)",
                rusqlite::params![sender_id.get(), content, encode_ts(&timestamp)],
            )?;

            Ok(Message {
                id: MessageId::new(conn.last_insert_rowid()),
                sender_id,
                content: content.to_string(),
                timestamp,
            })
        })
    }

    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, sender_id, content, timestamp FROM messages ORDER BY id ASC")?;
            let raw = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            raw.into_iter()
                .map(|(id, sender_id, content, ts)| {
                    Ok(Message {
                        id: MessageId::new(id),
                        sender_id: UserId::new(sender_id),
                        content,
                        timestamp: decode_ts(&ts)?,
                    })
                })
                .collect()
        })
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?)
        })
    }
}

impl MessageStore for MessageRepo {
    fn insert_message(
        &self,
        sender_id: UserId,
        content: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<Message, ChatError> {
        self.insert(sender_id, content, timestamp).map_err(|e| {
            if e.is_foreign_key() {
                ChatError::unknown_sender(sender_id)
            } else {
                e.into()
            }
        })
    }

    fn list_messages(&self) -> Result<Vec<Message>, ChatError> {
        Ok(self.list()?)
    }
}

fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table: "messages",
            column: "timestamp",
            detail: format!("{raw}: {e}"),
        })
}
