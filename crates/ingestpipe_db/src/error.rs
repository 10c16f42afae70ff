//! Errors surfaced by the warehouse client facade.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("identifier '{0}' is not a valid unquoted SQL identifier")]
    InvalidIdentifier(String),

    #[error("job {0} not found")]
    JobNotFound(String),

    #[error("stage upload failed: {0}")]
    StageUpload(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl DbError {
    /// Only transport-classified errors are retried (spec.md section 4.4).
    pub fn is_retriable(&self) -> bool {
        match self {
            DbError::Transport(_) => true,
            DbError::Sqlx(sqlx::Error::Io(_)) | DbError::Sqlx(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }
}
