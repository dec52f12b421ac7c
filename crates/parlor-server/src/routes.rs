//! HTTP and WebSocket route handlers.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use parlor_core::{ChatError, MessageView, UserId};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::AuthError;
use crate::error::ApiError;
use crate::server::AppState;
use crate::websocket::handler::ConnectionHandler;

/// Close code for an expired bearer token.
pub const CLOSE_TOKEN_EXPIRED: u16 = 4001;
/// Close code for a missing, malformed or mismatched bearer token.
pub const CLOSE_TOKEN_INVALID: u16 = 4002;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub connections: usize,
}

pub fn health_check(start_time: Instant, connections: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageList {
    pub messages: Vec<MessageView>,
}

/// Body of `POST /messages`. `content` is accepted as an alias of `message`.
#[derive(Debug, Deserialize)]
pub struct SubmitMessage {
    pub client_id: Option<UserId>,
    #[serde(alias = "content")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageSent {
    pub status: String,
    pub message: MessageView,
}

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// GET /
pub async fn home() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "Welcome to the Chat API" }))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health_check(state.start_time, state.registry.len()))
}

/// GET /messages
pub async fn list_messages(State(state): State<AppState>) -> Result<Json<MessageList>, ApiError> {
    let store = Arc::clone(&state.store);
    let messages = blocking(move || store.list_messages()).await?;
    Ok(Json(MessageList {
        messages: messages.iter().map(|m| m.view()).collect(),
    }))
}

/// POST /messages: persist and broadcast like a streaming submission.
pub async fn submit_message(
    State(state): State<AppState>,
    body: Result<Json<SubmitMessage>, JsonRejection>,
) -> Result<Json<MessageSent>, ApiError> {
    let Json(body) = body.map_err(|e| ChatError::validation(e.body_text()))?;
    let client_id = body
        .client_id
        .ok_or_else(|| ChatError::validation("missing client_id"))?;
    let text = body
        .message
        .ok_or_else(|| ChatError::validation("missing message"))?;

    let message = state.engine.submit(client_id, text).await?;
    Ok(Json(MessageSent {
        status: "Message sent".into(),
        message: message.view(),
    }))
}

/// POST /signup
pub async fn signup(
    State(state): State<AppState>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<Response, ApiError> {
    let (username, password) = credentials(body)?;
    let auth = Arc::clone(&state.auth);
    let user = blocking(move || auth.signup(&username, &password)).await?;
    let body = serde_json::json!({
        "message": "User created successfully",
        "id": user.id,
    });
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

/// POST /login
pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let (username, password) = credentials(body)?;
    let auth = Arc::clone(&state.auth);
    let access_token = blocking(move || auth.login(&username, &password)).await?;
    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".into(),
    }))
}

/// Run store access or password hashing on the blocking pool.
async fn blocking<T, E, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?.map_err(Into::into)
}

fn credentials(body: Result<Json<Credentials>, JsonRejection>) -> Result<(String, String), ApiError> {
    let Json(body) = body.map_err(|e| ChatError::validation(e.body_text()))?;
    let username = body
        .username
        .filter(|u| !u.trim().is_empty())
        .ok_or(AuthError::MissingField("username"))?;
    let password = body
        .password
        .filter(|p| !p.is_empty())
        .ok_or(AuthError::MissingField("password"))?;
    Ok((username, password))
}

/// GET /ws/{client_id}
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Path(client_id): Path<UserId>,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    if state.config.require_auth {
        let admitted = match params.token.as_deref() {
            Some(token) => state.auth.admit(client_id, token).map(|_| ()),
            None => Err(AuthError::TokenInvalid("missing token".into())),
        };
        if let Err(e) = admitted {
            warn!(client_id = %client_id, error = %e, "rejecting streaming client");
            let code = match &e {
                AuthError::TokenExpired => CLOSE_TOKEN_EXPIRED,
                _ => CLOSE_TOKEN_INVALID,
            };
            return ws.on_upgrade(move |socket| reject(socket, code, e.to_string()));
        }
    }

    ws.on_upgrade(move |socket| serve_socket(socket, client_id, state))
}

async fn reject(mut socket: WebSocket, code: u16, reason: String) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = socket.send(WsMessage::Close(Some(frame))).await;
}

async fn serve_socket(socket: WebSocket, client_id: UserId, state: AppState) {
    let (ws_tx, ws_rx) = socket.split();
    let handler = ConnectionHandler::new(
        client_id,
        state.engine.clone(),
        state.config.handler_settings(),
        state.shutdown.token(),
    );
    let reason = state
        .shutdown
        .track_session(handler.run(ws_tx, ws_rx))
        .await;
    info!(client_id = %client_id, ?reason, "streaming session ended");
}
