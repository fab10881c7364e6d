/// Debug session REST API endpoints
///
/// Thin wrappers over `WorkflowDebugger`. Sessions are created through
/// `POST /api/workflows/{id}/execute` with `debug: true`.

use crate::api::AppState;
use crate::error::DebuggerError;
use crate::runtime::debugger::{Breakpoint, DebugSession, StackFrame};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct StepRequest {
    #[serde(default = "default_step_type")]
    pub step_type: String,
}

fn default_step_type() -> String {
    "over".to_string()
}

#[derive(Debug, Deserialize)]
pub struct WatchRequest {
    pub expression: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetVariableRequest {
    pub value: Value,
}

/// Create debug session routes
pub fn create_debug_routes() -> Router<AppState> {
    Router::new()
        .route("/api/debug/sessions", get(list_sessions))
        .route("/api/debug/sessions/{id}", get(get_session).delete(stop_session))
        .route("/api/debug/sessions/{id}/breakpoints", post(set_breakpoint))
        .route("/api/debug/sessions/{id}/breakpoints/{bp}", delete(remove_breakpoint))
        .route("/api/debug/sessions/{id}/breakpoints/{bp}/toggle", post(toggle_breakpoint))
        .route("/api/debug/sessions/{id}/continue", post(continue_execution))
        .route("/api/debug/sessions/{id}/step", post(step_execution))
        .route("/api/debug/sessions/{id}/watches", post(add_watch).get(evaluate_watches))
        .route("/api/debug/sessions/{id}/watches/{watch}", delete(remove_watch))
        .route(
            "/api/debug/sessions/{id}/variables/{path}",
            get(get_variable).put(set_variable),
        )
        .route("/api/debug/sessions/{id}/stack", get(get_stack))
        .route("/api/debug/sessions/{id}/export", post(export_session))
}

/// Map debugger failures onto HTTP status codes
fn status_for(e: DebuggerError) -> StatusCode {
    match e {
        DebuggerError::SessionNotFound(_)
        | DebuggerError::BreakpointNotFound(_)
        | DebuggerError::WatchNotFound(_)
        | DebuggerError::VariableNotFound(_) => StatusCode::NOT_FOUND,
        DebuggerError::NestedVariableWrite(_)
        | DebuggerError::InvalidHitCondition(_)
        | DebuggerError::InvalidCondition(_) => StatusCode::BAD_REQUEST,
        DebuggerError::Export(message) => {
            tracing::error!("Failed to export debug data: {}", message);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// GET /api/debug/sessions
async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "sessions": state.debugger.list_sessions().await }))
}

/// GET /api/debug/sessions/{id}
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DebugSession>, StatusCode> {
    state.debugger.get_session_info(&id).await.map(Json).map_err(status_for)
}

/// DELETE /api/debug/sessions/{id}
///
/// Releases a paused run, which continues without the debugger.
async fn stop_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    state.debugger.stop_debug_session(&id).await.map_err(status_for)?;
    Ok(Json(json!({ "message": "Debug session stopped" })))
}

/// POST /api/debug/sessions/{id}/breakpoints
/// Body: { "breakpoint_type": "node_start", "node_id": "a", "hit_condition": "%2" }
async fn set_breakpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(breakpoint): Json<Breakpoint>,
) -> Result<Json<Value>, StatusCode> {
    let breakpoint_id = state
        .debugger
        .set_breakpoint(&id, breakpoint)
        .await
        .map_err(status_for)?;
    Ok(Json(json!({ "breakpoint_id": breakpoint_id })))
}

async fn remove_breakpoint(
    State(state): State<AppState>,
    Path((id, bp)): Path<(String, String)>,
) -> Result<Json<Value>, StatusCode> {
    state.debugger.remove_breakpoint(&id, &bp).await.map_err(status_for)?;
    Ok(Json(json!({ "message": "Breakpoint removed" })))
}

async fn toggle_breakpoint(
    State(state): State<AppState>,
    Path((id, bp)): Path<(String, String)>,
) -> Result<Json<Value>, StatusCode> {
    let enabled = state.debugger.toggle_breakpoint(&id, &bp).await.map_err(status_for)?;
    Ok(Json(json!({ "breakpoint_id": bp, "enabled": enabled })))
}

async fn continue_execution(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    state.debugger.continue_execution(&id).await.map_err(status_for)?;
    Ok(Json(json!({ "state": "running" })))
}

/// POST /api/debug/sessions/{id}/step
/// Body: { "step_type": "over" }
async fn step_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<StepRequest>,
) -> Result<Json<Value>, StatusCode> {
    state
        .debugger
        .step_execution(&id, &payload.step_type)
        .await
        .map_err(status_for)?;
    Ok(Json(json!({ "state": "stepped", "step_type": payload.step_type })))
}

/// POST /api/debug/sessions/{id}/watches
/// Body: { "expression": "user.name", "name": "who" }
async fn add_watch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<WatchRequest>,
) -> Result<Json<Value>, StatusCode> {
    if payload.expression.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let watch_id = state
        .debugger
        .add_watch_expression(&id, &payload.expression, payload.name.as_deref())
        .await
        .map_err(status_for)?;
    Ok(Json(json!({ "watch_id": watch_id })))
}

async fn remove_watch(
    State(state): State<AppState>,
    Path((id, watch)): Path<(String, String)>,
) -> Result<Json<Value>, StatusCode> {
    state
        .debugger
        .remove_watch_expression(&id, &watch)
        .await
        .map_err(status_for)?;
    Ok(Json(json!({ "message": "Watch removed" })))
}

/// GET /api/debug/sessions/{id}/watches
///
/// Evaluated against the session's variable mirror.
async fn evaluate_watches(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    let results = state
        .debugger
        .evaluate_watch_expressions(&id, None)
        .await
        .map_err(status_for)?;
    Ok(Json(json!({ "watches": results })))
}

/// GET /api/debug/sessions/{id}/variables/{path}
async fn get_variable(
    State(state): State<AppState>,
    Path((id, path)): Path<(String, String)>,
) -> Result<Json<Value>, StatusCode> {
    let value = state
        .debugger
        .get_variable_value(&id, &path)
        .await
        .map_err(status_for)?;
    Ok(Json(json!({ "path": path, "value": value })))
}

/// PUT /api/debug/sessions/{id}/variables/{path}
/// Body: { "value": ... }
///
/// Top-level names only; applied to the run when the paused node resumes.
async fn set_variable(
    State(state): State<AppState>,
    Path((id, path)): Path<(String, String)>,
    Json(payload): Json<SetVariableRequest>,
) -> Result<Json<Value>, StatusCode> {
    state
        .debugger
        .set_variable_value(&id, &path, payload.value.clone())
        .await
        .map_err(status_for)?;
    Ok(Json(json!({ "path": path, "value": payload.value })))
}

async fn get_stack(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<StackFrame>>, StatusCode> {
    state.debugger.get_call_stack(&id).await.map(Json).map_err(status_for)
}

/// POST /api/debug/sessions/{id}/export
async fn export_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    let path = state.debugger.export_debug_data(&id).await.map_err(status_for)?;
    Ok(Json(json!({ "path": path.display().to_string() })))
}
