use chrono::NaiveDate;
use thiserror::Error;

/// Errors that can occur within the calendar subsystem.
#[derive(Debug, Error)]
pub enum CalendarError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid cycle length {value}: must be 1..={max}")]
    InvalidCycleLength { value: u8, max: u8 },

    #[error("Invalid day order {value}: must be 1..={cycle_length}")]
    InvalidDayOrder { value: u8, cycle_length: u8 },

    #[error("Holiday name must not be empty")]
    EmptyHolidayName,

    #[error("No override for unit {unit} on {date}")]
    OverrideNotFound { unit: String, date: NaiveDate },
}

impl CalendarError {
    pub fn code(&self) -> &'static str {
        match self {
            CalendarError::Database(_) => "UNAVAILABLE",
            CalendarError::InvalidCycleLength { .. } => "INVALID_CYCLE_LENGTH",
            CalendarError::InvalidDayOrder { .. } => "INVALID_DAY_ORDER",
            CalendarError::EmptyHolidayName => "INVALID_INPUT",
            CalendarError::OverrideNotFound { .. } => "NOT_FOUND",
        }
    }
}

pub type Result<T> = std::result::Result<T, CalendarError>;
