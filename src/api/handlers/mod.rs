use axum::{
    extract::{RawPathParams, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::AppState;
use crate::gateway::ExecError;

// ============================================================
// Error Handling
// ============================================================

/// Log an internal error and return a sanitized response to the client.
/// The full error (which may include filesystem paths) stays in the server
/// log; clients only see a generic message.
fn internal_error(e: impl std::fmt::Display) -> (StatusCode, String) {
    tracing::error!("Internal error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

/// Map an execution failure to a status without echoing paths or process output.
fn exec_error(e: ExecError) -> (StatusCode, String) {
    match e {
        ExecError::InvalidPath(_) => (StatusCode::BAD_REQUEST, "Invalid script path".to_string()),
        ExecError::NotFound(_) => (StatusCode::NOT_FOUND, "Script not found".to_string()),
        ExecError::TimedOut(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            "Script timed out".to_string(),
        ),
        e @ (ExecError::ProcessFailure(_) | ExecError::Io(_)) => {
            tracing::error!("Script execution failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Script execution failed".to_string(),
            )
        }
    }
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Scripts
// ============================================================

/// Display names of all scripts, ordered by id.
pub async fn list_scripts(
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, (StatusCode, String)> {
    let mut scripts = state.registry.list().map_err(internal_error)?;
    scripts.sort_by_key(|s| s.id);

    Ok(Json(
        scripts
            .iter()
            .map(|s| s.display_name().to_string())
            .collect(),
    ))
}

/// Run a script and return its trimmed output as plain text.
///
/// Takes the raw path segment; the gateway does the percent-decoding so the
/// containment check sees exactly what will be joined onto the directory.
pub async fn execute_script(
    State(state): State<AppState>,
    params: RawPathParams,
) -> Result<String, (StatusCode, String)> {
    let raw_id = params
        .iter()
        .find_map(|(key, value)| (key == "id").then_some(value))
        .ok_or((StatusCode::BAD_REQUEST, "Missing script id".to_string()))?;

    state.gateway.execute(raw_id).await.map_err(exec_error)
}
