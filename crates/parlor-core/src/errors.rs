use crate::ids::UserId;

/// Error kinds shared by the registry, broadcast engine and handlers.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("validation error: {0}")]
    Validation(String),

    /// `constraint` is set when the store rejected the write (e.g. an unknown
    /// sender) rather than being unreachable.
    #[error("storage error: {detail}")]
    Storage { detail: String, constraint: bool },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("auth error: {0}")]
    Auth(String),
}

impl ChatError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn storage(detail: impl Into<String>) -> Self {
        Self::Storage {
            detail: detail.into(),
            constraint: false,
        }
    }

    pub fn constraint(detail: impl Into<String>) -> Self {
        Self::Storage {
            detail: detail.into(),
            constraint: true,
        }
    }

    pub fn unknown_sender(sender_id: UserId) -> Self {
        Self::constraint(format!("unknown sender {sender_id}"))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Storage { constraint: true, .. } => "storage_constraint",
            Self::Storage { .. } => "storage",
            Self::Transport(_) => "transport",
            Self::Auth(_) => "auth",
        }
    }
}
