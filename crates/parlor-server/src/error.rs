//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use parlor_core::ChatError;
use parlor_store::StoreError;
use serde_json::json;
use tracing::error;

use crate::auth::AuthError;

/// Error returned by HTTP handlers, rendered as
/// `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Chat(ChatError::Validation(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Chat(ChatError::Storage { constraint: true, .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Chat(ChatError::Auth(_)) => StatusCode::UNAUTHORIZED,
            Self::Chat(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Auth(AuthError::MissingField(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Auth(AuthError::UsernameTaken) => StatusCode::CONFLICT,
            Self::Auth(AuthError::Store(_)) | Self::Store(_) | Self::Task(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Chat(e) => e.error_kind(),
            Self::Auth(AuthError::MissingField(_)) => "validation",
            Self::Auth(AuthError::UsernameTaken) => "conflict",
            Self::Auth(AuthError::Store(_)) | Self::Store(_) => "storage",
            Self::Auth(_) => "auth",
            Self::Task(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, code = self.code(), "request failed");
        }
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlor_core::UserId;

    #[test]
    fn status_mapping() {
        let cases = [
            (ApiError::from(ChatError::validation("empty")), StatusCode::UNPROCESSABLE_ENTITY),
            (ApiError::from(ChatError::unknown_sender(UserId::new(3))), StatusCode::UNPROCESSABLE_ENTITY),
            (ApiError::from(ChatError::storage("disk")), StatusCode::INTERNAL_SERVER_ERROR),
            (ApiError::from(AuthError::UsernameTaken), StatusCode::CONFLICT),
            (ApiError::from(AuthError::InvalidCredentials), StatusCode::UNAUTHORIZED),
            (ApiError::from(AuthError::TokenExpired), StatusCode::UNAUTHORIZED),
            (ApiError::from(AuthError::MissingField("username")), StatusCode::UNPROCESSABLE_ENTITY),
            (ApiError::from(StoreError::NotFound("user 1".into())), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status, "{err}");
        }
    }

    #[tokio::test]
    async fn body_shape() {
        let resp = ApiError::from(ChatError::validation("message is empty")).into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"]["code"], "validation");
        assert!(parsed["error"]["message"].as_str().unwrap().contains("message is empty"));
    }
}
