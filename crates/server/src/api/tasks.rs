//! Per-task control endpoints: execute, cancel, test and history.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use sluice_core::{ExecutionRecord, TaskId};
use sluice_scheduler::TestPreview;
use uuid::Uuid;

use super::{api_error, ApiResult};
use crate::state::AppState;

const DEFAULT_HISTORY_LIMIT: u32 = 20;
const MAX_HISTORY_LIMIT: u32 = 500;

#[derive(Serialize)]
pub struct ExecuteResponse {
    pub execution_id: Uuid,
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<u32>,
}

/// Accept a manual run. 409 while the task already has a run in flight.
pub async fn task_execute(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<TaskId>,
) -> ApiResult<(StatusCode, Json<ExecuteResponse>)> {
    let execution_id = state
        .scheduler
        .execute_now(task_id)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::ACCEPTED, Json(ExecuteResponse { execution_id })))
}

pub async fn task_cancel(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<TaskId>,
) -> ApiResult<Json<CancelResponse>> {
    let cancelled = state.scheduler.cancel(task_id).await.map_err(api_error)?;
    Ok(Json(CancelResponse { cancelled }))
}

pub async fn task_test(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<TaskId>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Json<TestPreview>> {
    let limit = params.limit.map(|l| l.max(1) as usize);
    state
        .scheduler
        .test_task(task_id, limit)
        .await
        .map(Json)
        .map_err(api_error)
}

/// Newest first.
pub async fn task_executions(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<TaskId>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Json<Vec<ExecutionRecord>>> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    state
        .repository
        .list_execution_records(task_id, limit)
        .await
        .map(Json)
        .map_err(api_error)
}
