//! HTTP router construction.
//!
//! Assembles all Axum routes and middleware into a single `Router`.

#[cfg(test)]
mod tests;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::state::AppState;

/// Build the complete application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/scheduler/status", get(api::scheduler_status))
        .route("/scheduler/reload", post(api::scheduler_reload))
        .route("/tasks/{id}/execute", post(api::task_execute))
        .route("/tasks/{id}/cancel", post(api::task_cancel))
        .route("/tasks/{id}/test", post(api::task_test))
        .route("/tasks/{id}/executions", get(api::task_executions))
        .route("/executions/{id}", get(api::execution_get))
        .route("/data-sources/{id}/test", post(api::data_source_test))
        .route("/api/files/download/{name}", get(api::file_download))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
