//! Persist-then-fan-out for chat submissions.

use std::sync::Arc;

use chrono::Utc;
use parlor_core::message::validate_content;
use parlor_core::{ChatError, ConnectionId, Frame, Message, MessageStore, UserId};
use tracing::{debug, instrument, warn};

use super::registry::ConnectionRegistry;

/// Outcome of delivering one frame to a registry snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub evicted: Vec<ConnectionId>,
}

/// Turns submissions into stored messages and delivers them to every live
/// connection.
///
/// Delivery is best-effort and at-most-once. A recipient whose queue is full
/// or closed is evicted from the registry and told to close; the rest still
/// get the frame and the publish still succeeds.
pub struct BroadcastEngine {
    store: Arc<dyn MessageStore>,
    registry: Arc<ConnectionRegistry>,
    max_message_len: usize,
}

impl BroadcastEngine {
    pub fn new(
        store: Arc<dyn MessageStore>,
        registry: Arc<ConnectionRegistry>,
        max_message_len: usize,
    ) -> Self {
        Self {
            store,
            registry,
            max_message_len,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Validate, persist and broadcast a chat message from `sender_id`.
    ///
    /// Returns the stored message with its assigned id and timestamp.
    #[instrument(skip(self, content), fields(sender_id = %sender_id))]
    pub fn publish(&self, sender_id: UserId, content: &str) -> Result<Message, ChatError> {
        let content = validate_content(content, self.max_message_len)?;
        let message = self.store.insert_message(sender_id, content, None)?;

        let fan_out = self.fan_out(&message.frame());
        debug!(
            message_id = %message.id,
            recipients = fan_out.delivered,
            evicted = fan_out.evicted.len(),
            "message published"
        );
        Ok(message)
    }

    /// [`publish`](Self::publish) on the blocking pool, for async callers.
    pub async fn submit(
        self: &Arc<Self>,
        sender_id: UserId,
        content: String,
    ) -> Result<Message, ChatError> {
        let engine = Arc::clone(self);
        tokio::task::spawn_blocking(move || engine.publish(sender_id, &content))
            .await
            .map_err(|e| ChatError::storage(format!("publish task failed: {e}")))?
    }

    /// Tell every live connection that `client_id` went away. Not persisted.
    pub fn notify_disconnect(&self, client_id: UserId) -> FanOut {
        let fan_out = self.fan_out(&Frame::disconnect(client_id, Utc::now()));
        debug!(
            client_id = %client_id,
            recipients = fan_out.delivered,
            "disconnect notification sent"
        );
        fan_out
    }

    /// Deliver a frame to a snapshot of the registry.
    pub fn fan_out(&self, frame: &Frame) -> FanOut {
        let json = match frame.to_json() {
            Ok(j) => Arc::new(j),
            Err(e) => {
                warn!(error = %e, "failed to serialize frame");
                return FanOut::default();
            }
        };

        let mut result = FanOut::default();
        for conn in self.registry.snapshot() {
            match conn.send(Arc::clone(&json)) {
                Ok(()) => result.delivered += 1,
                Err(failure) => {
                    warn!(
                        conn_id = %conn.id,
                        client_id = %conn.client_id,
                        ?failure,
                        "send failed, evicting connection"
                    );
                    let _ = self.registry.remove(conn.id);
                    conn.close();
                    result.evicted.push(conn.id);
                }
            }
        }
        result
    }
}
