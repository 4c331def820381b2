use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe, returns server metadata.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "git_sha": env!("ROLLCALL_GIT_SHA"),
        "now": state.clock.now(),
        "today": state.calendar.today(),
        "materializer_units": state.config.materializer.units.len(),
        "event_subscribers": state.broadcaster.subscriber_count(),
    }))
}
