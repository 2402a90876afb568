use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use sluice_core::{DataSourceId, SluiceError};

use super::{api_error, ApiResult};
use crate::state::AppState;

#[derive(Serialize)]
pub struct ConnectionTestResponse {
    pub success: bool,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Try to reach a data source. An unreachable source is a normal response,
/// an unknown id is a 404.
pub async fn data_source_test(
    State(state): State<Arc<AppState>>,
    Path(data_source_id): Path<DataSourceId>,
) -> ApiResult<Json<ConnectionTestResponse>> {
    let started = Instant::now();
    let result = state.registry.test_connection(data_source_id).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(()) => Ok(Json(ConnectionTestResponse {
            success: true,
            error: None,
            elapsed_ms,
        })),
        Err(e @ SluiceError::DataSourceNotFound(_)) => Err(api_error(e)),
        Err(e) => {
            tracing::info!(data_source_id, error = %e, "connection test failed");
            Ok(Json(ConnectionTestResponse {
                success: false,
                error: Some(e.to_string()),
                elapsed_ms,
            }))
        }
    }
}
