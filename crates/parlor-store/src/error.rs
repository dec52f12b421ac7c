use parlor_core::ChatError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("foreign key violated: {0}")]
    ForeignKey(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },

    #[error("IO error: {0}")]
    Io(String),
}

impl StoreError {
    pub fn is_constraint(&self) -> bool {
        matches!(self, Self::Constraint(_) | Self::ForeignKey(_))
    }

    pub fn is_foreign_key(&self) -> bool {
        matches!(self, Self::ForeignKey(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
            {
                StoreError::ForeignKey(e.to_string())
            }
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Constraint(e.to_string())
            }
            _ => StoreError::Database(e.to_string()),
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(e: StoreError) -> Self {
        if e.is_constraint() {
            ChatError::constraint(e.to_string())
        } else {
            ChatError::storage(e.to_string())
        }
    }
}
