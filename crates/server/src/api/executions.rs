use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use sluice_core::ExecutionRecord;
use uuid::Uuid;

use super::{api_error, not_found, ApiResult};
use crate::state::AppState;

pub async fn execution_get(
    State(state): State<Arc<AppState>>,
    Path(execution_id): Path<Uuid>,
) -> ApiResult<Json<ExecutionRecord>> {
    state
        .repository
        .get_execution_record(execution_id)
        .await
        .map_err(api_error)?
        .map(Json)
        .ok_or_else(|| not_found(format!("Execution not found: {execution_id}")))
}
