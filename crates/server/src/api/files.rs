//! Download of exported files, the target of chat download links.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

use super::{not_found, ApiResult, ErrorResponse};
use crate::state::AppState;

/// Only bare file names inside the export directory are served.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(|c: char| c == '/' || c == '\\')
        && !name.contains('\0')
}

fn content_type(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "csv" => "text/csv; charset=utf-8",
        Some(ext) if ext == "json" => "application/json",
        _ => "application/octet-stream",
    }
}

pub async fn file_download(
    State(state): State<Arc<AppState>>,
    Path(file_name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if !is_plain_file_name(&file_name) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "invalid file name".to_string(),
            }),
        ));
    }

    let path = state.export_dir.join(&file_name);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(not_found(format!("File not found: {file_name}")))
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read export");
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ));
        }
    };

    let disposition = format!("attachment; filename=\"{}\"", file_name.replace('"', "_"));
    Ok((
        [
            (header::CONTENT_TYPE, content_type(&file_name).to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}
