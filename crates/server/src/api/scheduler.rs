//! Scheduler status and reload endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use sluice_scheduler::{ReloadReport, SchedulerStatus};

use super::{api_error, ApiResult};
use crate::state::AppState;

pub async fn scheduler_status(State(state): State<Arc<AppState>>) -> ApiResult<Json<SchedulerStatus>> {
    state.scheduler.get_status().await.map(Json).map_err(api_error)
}

/// Re-read active scheduled tasks from storage.
pub async fn scheduler_reload(State(state): State<Arc<AppState>>) -> ApiResult<Json<ReloadReport>> {
    let report = state.scheduler.reload_schedule().await.map_err(api_error)?;
    tracing::info!(
        scheduled = report.scheduled,
        errors = report.errors.len(),
        "reload requested over HTTP"
    );
    Ok(Json(report))
}
