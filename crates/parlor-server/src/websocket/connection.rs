//! One live client channel as seen by the registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parlor_core::{ChatError, ConnectionId, UserId};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a frame could not be queued for a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendFailure {
    /// The outbound queue is at capacity; the peer is not draining it.
    QueueFull,
    /// The writer side is gone or the connection was closed.
    Closed,
}

impl From<SendFailure> for ChatError {
    fn from(f: SendFailure) -> Self {
        match f {
            SendFailure::QueueFull => ChatError::Transport("outbound queue full".into()),
            SendFailure::Closed => ChatError::Transport("connection closed".into()),
        }
    }
}

/// Registry entry for an admitted channel.
///
/// The socket itself is owned by the connection handler; this holds only the
/// sending half of its bounded outbound queue.
pub struct Connection {
    pub id: ConnectionId,
    pub client_id: UserId,
    tx: mpsc::Sender<Arc<String>>,
    closed: CancellationToken,
    connected_at: Instant,
    dropped_messages: AtomicU64,
}

impl Connection {
    pub fn new(id: ConnectionId, client_id: UserId, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            client_id,
            tx,
            closed: CancellationToken::new(),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a serialized frame without waiting.
    pub fn send(&self, frame: Arc<String>) -> Result<(), SendFailure> {
        if self.closed.is_cancelled() {
            return Err(SendFailure::Closed);
        }
        self.tx.try_send(frame).map_err(|e| {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            match e {
                mpsc::error::TrySendError::Full(_) => SendFailure::QueueFull,
                mpsc::error::TrySendError::Closed(_) => SendFailure::Closed,
            }
        })
    }

    /// Signal the owning handler to tear the channel down.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once `close` has been called.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Time since the connection was admitted.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection(capacity: usize) -> (Connection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Connection::new(ConnectionId::new(1), UserId::new(10), tx);
        (conn, rx)
    }

    #[tokio::test]
    async fn send_queues_frame() {
        let (conn, mut rx) = make_connection(4);
        conn.send(Arc::new("hello".into())).unwrap();
        assert_eq!(&*rx.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let (conn, mut rx) = make_connection(8);
        for i in 0..5 {
            conn.send(Arc::new(format!("msg_{i}"))).unwrap();
        }
        for i in 0..5 {
            assert_eq!(&*rx.recv().await.unwrap(), &format!("msg_{i}"));
        }
    }

    #[test]
    fn full_queue_reports_and_counts() {
        let (conn, _rx) = make_connection(1);
        conn.send(Arc::new("a".into())).unwrap();
        assert_eq!(conn.send(Arc::new("b".into())), Err(SendFailure::QueueFull));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn dropped_receiver_is_closed() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        assert_eq!(conn.send(Arc::new("a".into())), Err(SendFailure::Closed));
    }

    #[tokio::test]
    async fn close_rejects_further_sends() {
        let (conn, _rx) = make_connection(4);
        assert!(!conn.is_closed());
        conn.close();
        assert!(conn.is_closed());
        conn.closed().await;
        assert_eq!(conn.send(Arc::new("late".into())), Err(SendFailure::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn age_tracks_time_since_admission() {
        let (conn, _rx) = make_connection(1);
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(conn.age() >= Duration::from_secs(3));
    }

    #[test]
    fn send_failure_maps_to_transport_error() {
        let err: ChatError = SendFailure::QueueFull.into();
        assert_eq!(err.error_kind(), "transport");
    }
}
