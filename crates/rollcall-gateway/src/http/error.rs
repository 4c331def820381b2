use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rollcall_calendar::CalendarError;
use rollcall_core::RollcallError;
use rollcall_scheduler::SchedulerError;
use rollcall_sessions::SessionError;
use rollcall_timetable::TimetableError;

/// Error rendered as `{"error": {"code", "message"}}`.
#[derive(Debug)]
pub struct ApiError {
    code: &'static str,
    message: String,
}

pub type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

impl ApiError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// 400 for malformed query / path values the extractors accept.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new("INVALID_INPUT", message)
    }

    pub fn status(&self) -> StatusCode {
        status_for(self.code)
    }
}

/// HTTP status for a stable error code.
pub fn status_for(code: &str) -> StatusCode {
    match code {
        "NOT_FOUND" => StatusCode::NOT_FOUND,
        "INVALID_INPUT" | "INVALID_CYCLE_LENGTH" | "INVALID_DAY_ORDER" | "INVALID_EXTENSION"
        | "UNKNOWN_ASSIGNMENT" => StatusCode::BAD_REQUEST,
        "SESSION_NOT_ACTIVE" | "CODE_ALREADY_USED" => StatusCode::CONFLICT,
        "CODE_EXPIRED" => StatusCode::GONE,
        "CODE_MISMATCH" => StatusCode::FORBIDDEN,
        "UNAVAILABLE" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code, "request failed: {}", self.message);
        }
        let body = serde_json::json!({
            "error": { "code": self.code, "message": self.message }
        });
        (status, Json(body)).into_response()
    }
}

macro_rules! from_coded {
    ($($ty:ty),+ $(,)?) => {
        $(impl From<$ty> for ApiError {
            fn from(e: $ty) -> Self {
                Self::new(e.code(), e.to_string())
            }
        })+
    };
}

from_coded!(
    CalendarError,
    TimetableError,
    SessionError,
    SchedulerError,
    RollcallError,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_statuses() {
        assert_eq!(status_for("NOT_FOUND"), StatusCode::NOT_FOUND);
        assert_eq!(status_for("INVALID_DAY_ORDER"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for("CODE_EXPIRED"), StatusCode::GONE);
        assert_eq!(status_for("CODE_MISMATCH"), StatusCode::FORBIDDEN);
        assert_eq!(status_for("UNAVAILABLE"), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for("SOMETHING_NEW"), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn session_errors_keep_their_code() {
        let err = ApiError::from(SessionError::NotFound { id: "nope".into() });
        assert_eq!(err.code, "NOT_FOUND");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
