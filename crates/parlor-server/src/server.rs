//! `ParlorServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use parlor_core::MessageStore;
use parlor_store::{Database, MessageRepo, UserRepo};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{AuthService, TokenIssuer};
use crate::config::ServerConfig;
use crate::routes;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::broadcast::BroadcastEngine;
use crate::websocket::registry::ConnectionRegistry;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BroadcastEngine>,
    pub registry: Arc<ConnectionRegistry>,
    pub store: Arc<dyn MessageStore>,
    pub auth: Arc<AuthService>,
    pub config: Arc<ServerConfig>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub start_time: Instant,
}

/// The chat server: one registry, one broadcast engine, one store.
pub struct ParlorServer {
    state: AppState,
}

impl ParlorServer {
    pub fn new(config: ServerConfig, db: Database) -> Self {
        let tokens = TokenIssuer::from_config(config.jwt_secret.as_deref(), config.token_ttl_minutes);
        Self::with_auth(config, db.clone(), AuthService::new(UserRepo::new(db), tokens))
    }

    /// Build with a preconfigured auth service (cheaper password hashing in tests).
    pub fn with_auth(config: ServerConfig, db: Database, auth: AuthService) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.max_send_queue));
        let store: Arc<dyn MessageStore> = Arc::new(MessageRepo::new(db));
        let engine = Arc::new(BroadcastEngine::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            config.max_message_len,
        ));

        Self {
            state: AppState {
                engine,
                registry,
                store,
                auth: Arc::new(auth),
                config: Arc::new(config),
                shutdown: Arc::new(ShutdownCoordinator::new()),
                start_time: Instant::now(),
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(routes::home))
            .route("/health", get(routes::health))
            .route("/messages", get(routes::list_messages).post(routes::submit_message))
            .route("/signup", post(routes::signup))
            .route("/login", post(routes::login))
            .route("/ws/{client_id}", get(routes::ws_upgrade))
            .with_state(self.state.clone())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind and serve until the shutdown coordinator fires. Returns the bound
    /// address (useful with port 0) and the server task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), std::io::Error> {
        let listener = tokio::net::TcpListener::bind(self.state.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.state.shutdown.token();

        info!(%addr, "parlor server listening");
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "server exited with error");
            }
            info!("parlor server stopped");
        });
        Ok((addr, handle))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.state.registry
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }
}
