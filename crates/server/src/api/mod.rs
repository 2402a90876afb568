//! Domain-focused API endpoint modules.
//!
//! Each sub-module owns a single responsibility area.
//! Shared error types and helpers live here in mod.rs.

mod data_sources;
mod executions;
mod files;
mod health;
mod scheduler;
mod tasks;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use sluice_core::SluiceError;

// ── Shared types ─────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub(crate) type ApiResult<T> = Result<T, (StatusCode, Json<ErrorResponse>)>;

/// Map a scheduler error onto an HTTP status with a JSON body.
pub(crate) fn api_error(e: SluiceError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &e {
        SluiceError::TaskNotFound(_) | SluiceError::DataSourceNotFound(_) => StatusCode::NOT_FOUND,
        SluiceError::AlreadyRunning(_) => StatusCode::CONFLICT,
        SluiceError::InvalidTask(_)
        | SluiceError::InvalidCronExpression { .. }
        | SluiceError::InvalidTimezone(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SluiceError::SchedulerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        SluiceError::DataSourceUnavailable(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::warn!(error = %e, status = status.as_u16(), "request failed");
    }
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

pub(crate) fn not_found(message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

// ── Re-exports ───────────────────────────────────────────────────
// Flat `api::foo` import paths used by router.rs route registration.

pub use data_sources::data_source_test;
pub use executions::execution_get;
pub use files::file_download;
pub use health::health;
pub use scheduler::{scheduler_reload, scheduler_status};
pub use tasks::{task_cancel, task_execute, task_executions, task_test};
