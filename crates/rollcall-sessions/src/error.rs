use chrono::{DateTime, Utc};
use rollcall_core::RollcallError;
use thiserror::Error;

use crate::types::SessionStatus;

/// Errors that can occur during attendance-session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {id}")]
    NotFound { id: String },

    /// Completed or expired sessions accept no further changes.
    #[error("session {id} is {status}")]
    SessionNotActive { id: String, status: SessionStatus },

    #[error("one-time code has expired")]
    CodeExpired,

    #[error("one-time code has already been used")]
    CodeAlreadyUsed,

    /// Wrong code, or a code issued to someone else.
    #[error("one-time code does not match")]
    CodeMismatch,

    #[error("new expiry {requested} must be later than {current}")]
    InvalidExtension {
        current: DateTime<Utc>,
        requested: DateTime<Utc>,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("could not allocate a unique session code after {attempts} attempts")]
    CodeSpaceExhausted { attempts: usize },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Collaborator(#[from] RollcallError),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::NotFound { .. } => "NOT_FOUND",
            SessionError::SessionNotActive { .. } => "SESSION_NOT_ACTIVE",
            SessionError::CodeExpired => "CODE_EXPIRED",
            SessionError::CodeAlreadyUsed => "CODE_ALREADY_USED",
            SessionError::CodeMismatch => "CODE_MISMATCH",
            SessionError::InvalidExtension { .. } => "INVALID_EXTENSION",
            SessionError::InvalidInput(_) => "INVALID_INPUT",
            SessionError::CodeSpaceExhausted { .. } => "UNAVAILABLE",
            SessionError::Database(_) => "UNAVAILABLE",
            SessionError::Collaborator(e) => e.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
