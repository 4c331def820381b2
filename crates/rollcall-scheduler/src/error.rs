use rollcall_calendar::CalendarError;
use rollcall_sessions::SessionError;
use rollcall_timetable::TimetableError;
use thiserror::Error;

/// Errors that can occur while materializing sessions.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Calendar(#[from] CalendarError),

    #[error(transparent)]
    Timetable(#[from] TimetableError),

    #[error(transparent)]
    Sessions(#[from] SessionError),
}

impl SchedulerError {
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Database(_) => "UNAVAILABLE",
            SchedulerError::Calendar(e) => e.code(),
            SchedulerError::Timetable(e) => e.code(),
            SchedulerError::Sessions(e) => e.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
