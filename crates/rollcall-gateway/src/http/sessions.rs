//! Attendance session routes.
//!
//! Participants hit `codes` then `attendance`; operators use the rest.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use rollcall_core::{ParticipantId, SessionId};
use rollcall_sessions::{
    AttendanceRecord, AttendanceSession, AttendanceSummary, IssuedCode, MarkOutcome, NewSession,
    SessionError, SessionRef, Verification,
};
use serde::Deserialize;

use super::calendar::DateQuery;
use super::error::{ApiError, ApiResult};
use crate::app::AppState;

/// GET /units/{unit}/sessions?date=
pub async fn list_for_unit(
    State(state): State<Arc<AppState>>,
    Path(unit): Path<String>,
    Query(q): Query<DateQuery>,
) -> ApiResult<Vec<AttendanceSession>> {
    Ok(Json(state.sessions.list_for_unit(&unit, q.date)?))
}

/// POST /sessions
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewSession>,
) -> Result<(StatusCode, Json<AttendanceSession>), ApiError> {
    let session = state.sessions.create_manual(new)?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// POST /sessions/verify: body `{"code": ".."}` or `{"id": ".."}`.
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Json(by): Json<SessionRef>,
) -> ApiResult<Verification> {
    Ok(Json(state.sessions.verify(&by)?))
}

/// GET /sessions/{id}
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<AttendanceSession> {
    Ok(Json(state.sessions.get(&SessionId::from(id))?))
}

/// GET /sessions/{id}/records
pub async fn records(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Vec<AttendanceRecord>> {
    Ok(Json(state.sessions.records(&SessionId::from(id))?))
}

#[derive(Debug, Deserialize)]
pub struct ParticipantBody {
    pub participant_id: String,
}

/// POST /sessions/{id}/codes
pub async fn issue_code(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ParticipantBody>,
) -> ApiResult<IssuedCode> {
    let participant = participant(&body.participant_id)?;
    let issued = state
        .gate
        .issue(&state.sessions, &SessionId::from(id), &participant)?;
    Ok(Json(issued))
}

#[derive(Debug, Deserialize)]
pub struct MarkBody {
    pub participant_id: String,
    pub code: String,
}

/// POST /sessions/{id}/attendance
pub async fn mark(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<MarkBody>,
) -> ApiResult<MarkOutcome> {
    let participant = participant(&body.participant_id)?;
    let id = SessionId::from(id);
    let token = match state.gate.consume_for(&id, &participant, &body.code) {
        Ok(token) => token,
        // A resend after a successful mark reports the existing row.
        Err(SessionError::CodeAlreadyUsed) => {
            return match state.sessions.record(&id, &participant)? {
                Some(record) => Ok(Json(MarkOutcome::AlreadyMarked(record))),
                None => Err(SessionError::CodeAlreadyUsed.into()),
            };
        }
        Err(e) => return Err(e.into()),
    };
    Ok(Json(state.sessions.mark_attendance(token)?))
}

/// POST /sessions/{id}/on-duty
pub async fn on_duty(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ParticipantBody>,
) -> ApiResult<AttendanceRecord> {
    let participant = participant(&body.participant_id)?;
    let record = state
        .sessions
        .grant_on_duty(&SessionId::from(id), &participant)?;
    Ok(Json(record))
}

/// POST /sessions/{id}/complete
pub async fn complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<AttendanceSession> {
    Ok(Json(state.sessions.complete(&SessionId::from(id))?))
}

#[derive(Debug, Deserialize)]
pub struct ExtendBody {
    pub expires_at: DateTime<Utc>,
}

/// POST /sessions/{id}/extend
pub async fn extend(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ExtendBody>,
) -> ApiResult<AttendanceSession> {
    let session = state
        .sessions
        .extend(&SessionId::from(id), body.expires_at)?;
    Ok(Json(session))
}

/// GET /sessions/{id}/summary
pub async fn summary(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<AttendanceSummary> {
    let summary = state
        .sessions
        .summary(&SessionId::from(id), &*state.directory)?;
    Ok(Json(summary))
}

fn participant(raw: &str) -> Result<ParticipantId, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::invalid_input("participant_id must not be empty"));
    }
    Ok(ParticipantId::from(trimmed))
}
