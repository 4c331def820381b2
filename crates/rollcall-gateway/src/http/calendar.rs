//! Calendar routes: day-order resolution, rotation config and the override
//! ledger.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{Duration, NaiveDate};
use rollcall_calendar::{DayOrderConfig, OverrideEntry, OverrideKind, Resolution};
use rollcall_core::config::DEFAULT_UPCOMING_DAYS;
use serde::Deserialize;

use super::error::{ApiError, ApiResult};
use crate::app::AppState;

/// Default width of an override listing when `to` is omitted.
const OVERRIDE_WINDOW_DAYS: i64 = 365;

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: Option<NaiveDate>,
}

/// GET /units/{unit}/day-order?date=
pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Path(unit): Path<String>,
    Query(q): Query<DateQuery>,
) -> ApiResult<Resolution> {
    let resolution = match q.date {
        Some(date) => state.calendar.resolve(&unit, date)?,
        None => state.calendar.resolve_today(&unit)?,
    };
    Ok(Json(resolution))
}

#[derive(Debug, Deserialize)]
pub struct UpcomingQuery {
    pub from: Option<NaiveDate>,
    pub days: Option<u32>,
}

/// GET /units/{unit}/upcoming?from=&days=
pub async fn upcoming(
    State(state): State<Arc<AppState>>,
    Path(unit): Path<String>,
    Query(q): Query<UpcomingQuery>,
) -> ApiResult<Vec<Resolution>> {
    let from = q.from.unwrap_or_else(|| state.calendar.today());
    let days = q.days.unwrap_or(DEFAULT_UPCOMING_DAYS);
    Ok(Json(state.calendar.upcoming(&unit, from, days)?))
}

/// GET /units/{unit}/config
pub async fn get_config(
    State(state): State<Arc<AppState>>,
    Path(unit): Path<String>,
) -> ApiResult<DayOrderConfig> {
    Ok(Json(state.calendar.get_config(&unit)?))
}

#[derive(Debug, Deserialize)]
pub struct ConfigBody {
    pub cycle_length: u8,
    /// Day order today should have.
    pub anchor_day_order: u8,
}

/// POST /units/{unit}/config
pub async fn update_config(
    State(state): State<Arc<AppState>>,
    Path(unit): Path<String>,
    Json(body): Json<ConfigBody>,
) -> ApiResult<DayOrderConfig> {
    let config = state
        .calendar
        .update_config(&unit, body.cycle_length, body.anchor_day_order)?;
    Ok(Json(config))
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// GET /units/{unit}/overrides?from=&to=
pub async fn list_overrides(
    State(state): State<Arc<AppState>>,
    Path(unit): Path<String>,
    Query(q): Query<RangeQuery>,
) -> ApiResult<Vec<OverrideEntry>> {
    let from = q.from.unwrap_or_else(|| state.calendar.today());
    let to = q.to.unwrap_or_else(|| {
        from.checked_add_signed(Duration::days(OVERRIDE_WINDOW_DAYS))
            .unwrap_or(NaiveDate::MAX)
    });
    if to < from {
        return Err(ApiError::invalid_input(format!(
            "range end {to} is before its start {from}"
        )));
    }
    Ok(Json(state.calendar.list_overrides(&unit, from, to)?))
}

#[derive(Debug, Deserialize)]
pub struct OverrideBody {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub kind: OverrideKind,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
}

/// POST /units/{unit}/overrides
pub async fn set_override(
    State(state): State<Arc<AppState>>,
    Path(unit): Path<String>,
    Json(body): Json<OverrideBody>,
) -> ApiResult<OverrideEntry> {
    let entry = state.calendar.set_override(
        &unit,
        body.date,
        body.kind,
        body.reason.as_deref(),
        body.actor.as_deref().unwrap_or("api"),
    )?;
    Ok(Json(entry))
}

/// DELETE /units/{unit}/overrides/{date}
pub async fn delete_override(
    State(state): State<Arc<AppState>>,
    Path((unit, date)): Path<(String, NaiveDate)>,
) -> ApiResult<OverrideEntry> {
    Ok(Json(state.calendar.delete_override(&unit, date)?))
}
