use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::NaiveTime;
use rollcall_core::collab::{Assignment, AssignmentSource};
use rollcall_core::UnitId;
use rollcall_timetable::{DayEntry, PeriodDefinition, PeriodSlot, SlotInput};
use serde::Deserialize;

use super::error::ApiResult;
use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct SubUnitQuery {
    pub sub_unit: Option<String>,
}

/// GET /units/{unit}/timetable/{day_order}?sub_unit=
///
/// Stored slots merged with the unit's period template.
pub async fn get_day(
    State(state): State<Arc<AppState>>,
    Path((unit, day_order)): Path<(String, u8)>,
    Query(q): Query<SubUnitQuery>,
) -> ApiResult<Vec<DayEntry>> {
    let day = state
        .timetable
        .day_with_template(&unit, q.sub_unit.as_deref(), day_order)?;
    Ok(Json(day))
}

#[derive(Debug, Deserialize)]
pub struct ReplaceDayBody {
    #[serde(default)]
    pub sub_unit: Option<String>,
    pub slots: Vec<SlotInput>,
    /// Check every (subject, responsible party) against the assignment list.
    #[serde(default)]
    pub validate_assignments: bool,
}

/// PUT /units/{unit}/timetable/{day_order}
pub async fn replace_day(
    State(state): State<Arc<AppState>>,
    Path((unit, day_order)): Path<(String, u8)>,
    Json(body): Json<ReplaceDayBody>,
) -> ApiResult<Vec<PeriodSlot>> {
    let assignments: Option<&dyn AssignmentSource> = if body.validate_assignments {
        Some(&*state.directory)
    } else {
        None
    };
    let slots = state.timetable.replace_day(
        &unit,
        body.sub_unit.as_deref(),
        day_order,
        &body.slots,
        assignments,
    )?;
    Ok(Json(slots))
}

/// GET /units/{unit}/periods
pub async fn list_periods(
    State(state): State<Arc<AppState>>,
    Path(unit): Path<String>,
) -> ApiResult<Vec<PeriodDefinition>> {
    Ok(Json(state.timetable.list_definitions(&unit)?))
}

#[derive(Debug, Deserialize)]
pub struct PeriodBody {
    pub name: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[serde(default)]
    pub is_break: bool,
}

/// PUT /units/{unit}/periods/{period}
pub async fn set_period(
    State(state): State<Arc<AppState>>,
    Path((unit, period)): Path<(String, u8)>,
    Json(body): Json<PeriodBody>,
) -> ApiResult<PeriodDefinition> {
    let def = PeriodDefinition {
        unit_id: unit,
        period_number: period,
        name: body.name,
        start_time: body.start_time,
        end_time: body.end_time,
        is_break: body.is_break,
    };
    state.timetable.set_definition(&def)?;
    Ok(Json(def))
}

/// GET /units/{unit}/assignments
pub async fn list_assignments(
    State(state): State<Arc<AppState>>,
    Path(unit): Path<String>,
) -> ApiResult<Vec<Assignment>> {
    Ok(Json(state.directory.list_assignments(&UnitId::from(unit))?))
}
