use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::NaiveDate;
use rollcall_scheduler::{MaterializationOutcome, PendingPreview};
use serde::Deserialize;

use super::error::{ApiError, ApiResult};
use super::timetable::SubUnitQuery;
use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct MaterializeBody {
    #[serde(default)]
    pub sub_unit: Option<String>,
    /// Backfill a specific date up to today instead of today. Slots already
    /// past at the current instant are still skipped.
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

/// POST /units/{unit}/materialize
///
/// `{}` materializes today for every sub-unit.
pub async fn materialize(
    State(state): State<Arc<AppState>>,
    Path(unit): Path<String>,
    Json(body): Json<MaterializeBody>,
) -> ApiResult<MaterializationOutcome> {
    let sub_unit = body.sub_unit.as_deref();
    let outcome = match body.date {
        Some(date) if date > state.calendar.today() => {
            return Err(ApiError::invalid_input(format!(
                "cannot backfill {date}: it is after today"
            )));
        }
        Some(date) => state
            .materializer
            .materialize_on(&unit, date, state.clock.now(), sub_unit)?,
        None => state.materializer.materialize_today(&unit, sub_unit)?,
    };
    Ok(Json(outcome))
}

/// GET /units/{unit}/materialize/pending?sub_unit=
pub async fn pending(
    State(state): State<Arc<AppState>>,
    Path(unit): Path<String>,
    Query(q): Query<SubUnitQuery>,
) -> ApiResult<PendingPreview> {
    Ok(Json(state.materializer.pending(&unit, q.sub_unit.as_deref())?))
}
