use rollcall_core::RollcallError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimetableError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid slot for period {period_number}: {reason}")]
    InvalidSlot { period_number: u8, reason: String },

    #[error("Period {period_number} appears more than once")]
    DuplicatePeriod { period_number: u8 },

    #[error("Invalid day order {value}: must be 1..={max}")]
    InvalidDayOrder { value: u8, max: u8 },

    #[error("{subject} is not assigned to {responsible_party}")]
    UnknownAssignment {
        subject: String,
        responsible_party: String,
    },

    #[error(transparent)]
    Collaborator(#[from] RollcallError),
}

impl TimetableError {
    pub fn code(&self) -> &'static str {
        match self {
            TimetableError::Database(_) => "UNAVAILABLE",
            TimetableError::InvalidSlot { .. } => "INVALID_INPUT",
            TimetableError::DuplicatePeriod { .. } => "INVALID_INPUT",
            TimetableError::InvalidDayOrder { .. } => "INVALID_DAY_ORDER",
            TimetableError::UnknownAssignment { .. } => "UNKNOWN_ASSIGNMENT",
            TimetableError::Collaborator(e) => e.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TimetableError>;
