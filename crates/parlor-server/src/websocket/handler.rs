//! Per-client connection lifecycle: admission, receive loop, teardown.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message as WsMessage;
use futures::{Sink, SinkExt, Stream, StreamExt};
use parlor_core::{ChatError, UserId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::broadcast::BroadcastEngine;
use super::connection::Connection;

/// Lifecycle of one handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerState {
    Connecting,
    Admitted,
    Receiving,
    Closed,
}

/// How the receive loop ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent a close frame or ended the stream.
    PeerClosed,
    /// Reading from the socket failed.
    Transport(String),
    /// A submission could not be stored.
    Storage(String),
    /// The connection was closed from our side after a failed send.
    Evicted,
    /// The server is shutting down.
    Shutdown,
}

impl CloseReason {
    pub fn is_normal(&self) -> bool {
        matches!(self, Self::PeerClosed)
    }
}

/// Knobs taken from the server configuration.
#[derive(Clone, Debug)]
pub struct HandlerSettings {
    pub send_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Also announce disconnects that were not a clean peer close.
    pub notify_on_abnormal_close: bool,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            notify_on_abnormal_close: false,
        }
    }
}

/// Owns one client's channel from admission to teardown.
pub struct ConnectionHandler {
    client_id: UserId,
    engine: Arc<BroadcastEngine>,
    settings: HandlerSettings,
    shutdown: CancellationToken,
    state: HandlerState,
}

impl ConnectionHandler {
    pub fn new(
        client_id: UserId,
        engine: Arc<BroadcastEngine>,
        settings: HandlerSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client_id,
            engine,
            settings,
            shutdown,
            state: HandlerState::Connecting,
        }
    }

    fn transition(&mut self, next: HandlerState) {
        debug!(client_id = %self.client_id, from = ?self.state, to = ?next, "handler state");
        self.state = next;
    }

    /// Drive the channel until it closes. `ws_tx`/`ws_rx` are the two halves
    /// of an accepted socket.
    pub async fn run<Tx, Rx, E>(mut self, ws_tx: Tx, mut ws_rx: Rx) -> CloseReason
    where
        Tx: Sink<WsMessage> + Unpin + Send + 'static,
        Tx::Error: Display + Send,
        Rx: Stream<Item = Result<WsMessage, E>> + Unpin,
        E: Display,
    {
        let registry = Arc::clone(self.engine.registry());
        let (conn, outbound) = registry.admit(self.client_id);
        self.transition(HandlerState::Admitted);
        info!(client_id = %self.client_id, conn_id = %conn.id, "client connected");

        let writer = spawn_writer(Arc::clone(&conn), outbound, ws_tx, self.settings.clone());

        self.transition(HandlerState::Receiving);
        let reason = self.receive_loop(&conn, &mut ws_rx).await;

        let _ = registry.remove(conn.id);
        conn.close();
        if timeout(self.settings.send_timeout, writer).await.is_err() {
            warn!(conn_id = %conn.id, "writer did not stop in time");
        }

        let notify = match &reason {
            CloseReason::PeerClosed => true,
            CloseReason::Shutdown => false,
            _ => self.settings.notify_on_abnormal_close,
        };
        if notify {
            let _ = self.engine.notify_disconnect(self.client_id);
        }

        let age_ms = conn.age().as_millis() as u64;
        let dropped = conn.drop_count();
        if reason.is_normal() {
            info!(client_id = %self.client_id, conn_id = %conn.id, age_ms, dropped, "client disconnected");
        } else {
            warn!(client_id = %self.client_id, conn_id = %conn.id, age_ms, dropped, ?reason, "connection closed abnormally");
        }
        self.transition(HandlerState::Closed);
        reason
    }

    async fn receive_loop<Rx, E>(&self, conn: &Connection, ws_rx: &mut Rx) -> CloseReason
    where
        Rx: Stream<Item = Result<WsMessage, E>> + Unpin,
        E: Display,
    {
        loop {
            let frame = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return CloseReason::Shutdown,
                () = conn.closed() => return CloseReason::Evicted,
                frame = ws_rx.next() => frame,
            };

            let text = match frame {
                None | Some(Ok(WsMessage::Close(_))) => return CloseReason::PeerClosed,
                Some(Err(e)) => return CloseReason::Transport(e.to_string()),
                Some(Ok(WsMessage::Text(text))) => text,
                Some(Ok(WsMessage::Binary(bytes))) => {
                    warn!(conn_id = %conn.id, len = bytes.len(), "ignoring binary frame");
                    continue;
                }
                Some(Ok(_)) => continue,
            };

            // One publish at a time keeps this client's messages in order.
            match self.engine.submit(self.client_id, text.to_string()).await {
                Ok(_) => {}
                Err(ChatError::Validation(msg)) => {
                    warn!(conn_id = %conn.id, reason = %msg, "dropping invalid frame");
                }
                Err(e) => {
                    warn!(conn_id = %conn.id, error = %e, kind = e.error_kind(), "publish failed");
                    return CloseReason::Storage(e.to_string());
                }
            }
        }
    }
}

/// Forward queued frames to the socket, with a heartbeat ping. Any send that
/// fails or exceeds `send_timeout` closes the connection.
fn spawn_writer<Tx>(
    conn: Arc<Connection>,
    mut outbound: mpsc::Receiver<Arc<String>>,
    mut ws_tx: Tx,
    settings: HandlerSettings,
) -> JoinHandle<()>
where
    Tx: Sink<WsMessage> + Unpin + Send + 'static,
    Tx::Error: Display + Send,
{
    tokio::spawn(async move {
        let mut ping = tokio::time::interval(settings.heartbeat_interval);
        ping.tick().await; // first tick is immediate

        loop {
            let msg = tokio::select! {
                biased;
                () = conn.closed() => break,
                frame = outbound.recv() => match frame {
                    Some(text) => WsMessage::Text(text.as_str().into()),
                    None => break,
                },
                _ = ping.tick() => WsMessage::Ping(Vec::new().into()),
            };

            match timeout(settings.send_timeout, ws_tx.send(msg)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(conn_id = %conn.id, error = %e, "socket write failed");
                    conn.close();
                    break;
                }
                Err(_) => {
                    warn!(conn_id = %conn.id, timeout_ms = settings.send_timeout.as_millis() as u64, "socket write timed out");
                    conn.close();
                    break;
                }
            }
        }

        let _ = timeout(settings.send_timeout, ws_tx.close()).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::registry::ConnectionRegistry;
    use futures::channel::mpsc as fmpsc;
    use parlor_core::{Frame, FrameKind};
    use parlor_store::{Database, MessageRepo, UserRepo};

    type Inbound = fmpsc::UnboundedSender<Result<WsMessage, String>>;
    type Outbound = fmpsc::UnboundedReceiver<WsMessage>;

    struct Fixture {
        engine: Arc<BroadcastEngine>,
        registry: Arc<ConnectionRegistry>,
        store: Arc<MessageRepo>,
        alice: UserId,
        bob: UserId,
    }

    fn fixture() -> Fixture {
        let db = Database::in_memory().unwrap();
        let users = UserRepo::new(db.clone());
        let alice = users.create("alice", "h").unwrap().id;
        let bob = users.create("bob", "h").unwrap().id;
        let store = Arc::new(MessageRepo::new(db));
        let registry = Arc::new(ConnectionRegistry::new(16));
        let engine = Arc::new(BroadcastEngine::new(store.clone(), registry.clone(), 1024));
        Fixture {
            engine,
            registry,
            store,
            alice,
            bob,
        }
    }

    fn settings(notify_on_abnormal_close: bool) -> HandlerSettings {
        HandlerSettings {
            send_timeout: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(60),
            notify_on_abnormal_close,
        }
    }

    fn spawn_handler(
        f: &Fixture,
        client_id: UserId,
        settings: HandlerSettings,
        shutdown: CancellationToken,
    ) -> (Inbound, Outbound, JoinHandle<CloseReason>) {
        let (in_tx, in_rx) = fmpsc::unbounded();
        let (out_tx, out_rx) = fmpsc::unbounded();
        let handler = ConnectionHandler::new(client_id, f.engine.clone(), settings, shutdown);
        let handle = tokio::spawn(handler.run(out_tx, in_rx));
        (in_tx, out_rx, handle)
    }

    async fn wait_for_connections(registry: &ConnectionRegistry, n: usize) {
        timeout(Duration::from_secs(2), async {
            while registry.len() != n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("registry reached expected size");
    }

    async fn next_frame(out: &mut Outbound) -> Frame {
        let msg = timeout(Duration::from_secs(2), out.next())
            .await
            .expect("frame in time")
            .expect("socket open");
        match msg {
            WsMessage::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn text_frame_is_published_and_echoed() {
        let f = fixture();
        let (in_tx, mut out, handle) = spawn_handler(&f, f.alice, settings(false), CancellationToken::new());
        wait_for_connections(&f.registry, 1).await;

        in_tx.unbounded_send(Ok(WsMessage::Text("hello".into()))).unwrap();
        let frame = next_frame(&mut out).await;
        assert_eq!(frame.kind, FrameKind::Message);
        assert_eq!(frame.body.content, "hello");
        assert_eq!(frame.body.client_id, f.alice);

        drop(in_tx);
        assert_eq!(handle.await.unwrap(), CloseReason::PeerClosed);
        assert_eq!(f.store.list().unwrap().len(), 1);
        assert!(f.registry.is_empty());
    }

    #[tokio::test]
    async fn messages_from_one_client_keep_order() {
        let f = fixture();
        let (in_tx, mut out, handle) = spawn_handler(&f, f.alice, settings(false), CancellationToken::new());
        wait_for_connections(&f.registry, 1).await;

        for i in 0..10 {
            in_tx.unbounded_send(Ok(WsMessage::Text(format!("m{i}").into()))).unwrap();
        }
        for i in 0..10 {
            assert_eq!(next_frame(&mut out).await.body.content, format!("m{i}"));
        }

        drop(in_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn normal_close_notifies_others_once() {
        let f = fixture();
        let (_observer, mut observer_rx) = f.registry.admit(f.bob);
        let (in_tx, _out, handle) = spawn_handler(&f, f.alice, settings(false), CancellationToken::new());
        wait_for_connections(&f.registry, 2).await;

        in_tx.unbounded_send(Ok(WsMessage::Close(None))).unwrap();
        assert_eq!(handle.await.unwrap(), CloseReason::PeerClosed);

        let raw = observer_rx.recv().await.unwrap();
        let frame: Frame = serde_json::from_str(&raw).unwrap();
        assert_eq!(frame.kind, FrameKind::Disconnect);
        assert_eq!(frame.body.client_id, f.alice);
        assert!(observer_rx.try_recv().is_err());
        assert_eq!(f.store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn transport_error_closes_silently() {
        let f = fixture();
        let (_observer, mut observer_rx) = f.registry.admit(f.bob);
        let (in_tx, _out, handle) = spawn_handler(&f, f.alice, settings(false), CancellationToken::new());
        wait_for_connections(&f.registry, 2).await;

        in_tx.unbounded_send(Err("connection reset".into())).unwrap();
        let reason = handle.await.unwrap();
        assert_eq!(reason, CloseReason::Transport("connection reset".into()));
        assert!(!reason.is_normal());

        assert!(observer_rx.try_recv().is_err());
        assert_eq!(f.registry.len(), 1);
    }

    #[tokio::test]
    async fn abnormal_close_notifies_when_enabled() {
        let f = fixture();
        let (_observer, mut observer_rx) = f.registry.admit(f.bob);
        let (in_tx, _out, handle) = spawn_handler(&f, f.alice, settings(true), CancellationToken::new());
        wait_for_connections(&f.registry, 2).await;

        in_tx.unbounded_send(Err("broken pipe".into())).unwrap();
        handle.await.unwrap();

        let frame: Frame = serde_json::from_str(&observer_rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame.kind, FrameKind::Disconnect);
    }

    #[tokio::test]
    async fn storage_failure_ends_only_this_handler() {
        let f = fixture();
        let (_observer, mut observer_rx) = f.registry.admit(f.bob);
        let ghost = UserId::new(4242);
        let (in_tx, _out, handle) = spawn_handler(&f, ghost, settings(false), CancellationToken::new());
        wait_for_connections(&f.registry, 2).await;

        in_tx.unbounded_send(Ok(WsMessage::Text("boo".into()))).unwrap();
        let reason = handle.await.unwrap();
        assert!(matches!(reason, CloseReason::Storage(_)));

        // observer untouched and still registered
        assert!(observer_rx.try_recv().is_err());
        assert_eq!(f.registry.len(), 1);
        f.engine.publish(f.bob, "still works").unwrap();
        assert!(observer_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn empty_frame_is_skipped() {
        let f = fixture();
        let (in_tx, mut out, handle) = spawn_handler(&f, f.alice, settings(false), CancellationToken::new());
        wait_for_connections(&f.registry, 1).await;

        in_tx.unbounded_send(Ok(WsMessage::Text("".into()))).unwrap();
        in_tx.unbounded_send(Ok(WsMessage::Text("after".into()))).unwrap();
        assert_eq!(next_frame(&mut out).await.body.content, "after");

        drop(in_tx);
        assert_eq!(handle.await.unwrap(), CloseReason::PeerClosed);
        assert_eq!(f.store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn shutdown_ends_without_notification() {
        let f = fixture();
        let (_observer, mut observer_rx) = f.registry.admit(f.bob);
        let shutdown = CancellationToken::new();
        let (_in_tx, _out, handle) = spawn_handler(&f, f.alice, settings(true), shutdown.clone());
        wait_for_connections(&f.registry, 2).await;

        shutdown.cancel();
        assert_eq!(handle.await.unwrap(), CloseReason::Shutdown);
        assert!(observer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn eviction_ends_handler() {
        let f = fixture();
        let (_in_tx, _out, handle) = spawn_handler(&f, f.alice, settings(false), CancellationToken::new());
        wait_for_connections(&f.registry, 1).await;

        let conn = f.registry.connections_for(f.alice).pop().unwrap();
        f.registry.remove(conn.id);
        conn.close();

        assert_eq!(handle.await.unwrap(), CloseReason::Evicted);
    }

    #[tokio::test]
    async fn two_connections_same_identity() {
        let f = fixture();
        let (tx1, mut out1, h1) = spawn_handler(&f, f.alice, settings(false), CancellationToken::new());
        let (tx2, mut out2, h2) = spawn_handler(&f, f.alice, settings(false), CancellationToken::new());
        wait_for_connections(&f.registry, 2).await;

        tx1.unbounded_send(Ok(WsMessage::Text("from tab one".into()))).unwrap();
        assert_eq!(next_frame(&mut out1).await.body.content, "from tab one");
        assert_eq!(next_frame(&mut out2).await.body.content, "from tab one");

        drop(tx1);
        h1.await.unwrap();
        // the remaining tab hears that its sibling left
        assert_eq!(next_frame(&mut out2).await.kind, FrameKind::Disconnect);

        drop(tx2);
        h2.await.unwrap();
        assert!(f.registry.is_empty());
    }
}
