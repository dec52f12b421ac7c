use chrono::{DateTime, Utc};

use crate::errors::ChatError;
use crate::ids::UserId;
use crate::message::Message;

/// Persistence contract consumed by the broadcast engine.
///
/// Implementations treat each insert as atomic and assign ids that increase
/// with insert order.
pub trait MessageStore: Send + Sync {
    /// Append a message. When `timestamp` is `None` the store stamps it.
    fn insert_message(
        &self,
        sender_id: UserId,
        content: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<Message, ChatError>;

    /// All persisted messages in insertion order.
    fn list_messages(&self) -> Result<Vec<Message>, ChatError>;
}
