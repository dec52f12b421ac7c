//! Process-wide shutdown signal and task draining.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TrackedFuture;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the cancellation token every connection handler watches, plus the
/// background tasks and streaming sessions that must finish before the
/// process exits.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            sessions: TaskTracker::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Register a task to await during [`drain`](Self::drain).
    pub fn track(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    pub fn tracked(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Count `session` as live until it completes; [`drain`](Self::drain)
    /// waits for it.
    pub fn track_session<F: Future>(&self, session: F) -> TrackedFuture<F> {
        self.sessions.track_future(session)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Signal shutdown. Idempotent.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("shutdown requested");
        }
        self.token.cancel();
    }

    /// Signal shutdown, then wait up to `timeout` for tracked tasks and
    /// sessions. Tasks still running after the deadline are aborted.
    pub async fn drain(&self, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        self.shutdown();
        self.sessions.close();

        let handles: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        info!(
            tasks = handles.len(),
            sessions = self.sessions.len(),
            timeout_ms = timeout.as_millis() as u64,
            "draining"
        );

        let all_done = async {
            futures::future::join_all(handles).await;
            self.sessions.wait().await;
        };
        if tokio::time::timeout(timeout, all_done).await.is_err() {
            warn!(
                ?timeout,
                sessions = self.sessions.len(),
                "drain timed out, aborting remaining tasks"
            );
            for handle in aborts {
                handle.abort();
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
