/// Workflow management REST API endpoints
///
/// CRUD over stored workflow definitions, execution triggering (optionally
/// under a debug session) and read access to execution state.

use crate::api::AppState;
use crate::runtime::debugger::Breakpoint;
use crate::workflow::{EntityStore, ExecutionState, Variables, WorkflowDefinition};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Response for workflow creation/update operations
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub message: String,
}

/// Request body for workflow creation
#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub workflow: WorkflowDefinition,
}

/// Request body for `POST /api/workflows/{id}/execute`
#[derive(Debug, Default, Deserialize)]
pub struct ExecuteWorkflowRequest {
    /// Overrides the definition's default variables
    #[serde(default)]
    pub variables: Option<Variables>,
    /// Attach a debug session and run in the background
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub breakpoints: Vec<Breakpoint>,
}

/// Create workflow and execution routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(create_workflow).get(list_workflows))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/api/workflows/{id}/execute", post(execute_workflow))
        .route("/api/executions", get(list_executions))
        .route("/api/executions/{id}", get(get_execution))
}

fn validate(workflow: &WorkflowDefinition) -> Result<(), StatusCode> {
    if workflow.id.is_empty() || workflow.name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if workflow.start_nodes().is_empty() {
        tracing::warn!("⚠️ Rejected workflow {} without a start node", workflow.id);
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(())
}

/// Create a new workflow
///
/// POST /api/workflows
/// Body: { "workflow": { "id": "...", "name": "...", "nodes": { "start": { "type": "start", ... } } } }
async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<CreateWorkflowRequest>,
) -> Result<Json<WorkflowResponse>, StatusCode> {
    let workflow = payload.workflow;
    validate(&workflow)?;

    match state.workflows.load(&workflow.id).await {
        Ok(Some(_)) => return Err(StatusCode::CONFLICT),
        Ok(None) => {}
        Err(_) => return Err(StatusCode::BAD_REQUEST),
    }

    if let Err(e) = state.workflows.save(&workflow).await {
        tracing::error!("Failed to save workflow: {}", e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    tracing::info!("🔥 Created workflow: {} ({})", workflow.id, workflow.name);
    Ok(Json(WorkflowResponse {
        id: workflow.id.clone(),
        message: format!("Workflow '{}' created successfully", workflow.name),
    }))
}

/// List all workflows
///
/// GET /api/workflows
async fn list_workflows(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    match state.workflows.list_all().await {
        Ok(mut workflows) => {
            workflows.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(Json(json!({ "workflows": workflows })))
        }
        Err(e) => {
            tracing::error!("Failed to list workflows: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowDefinition>, StatusCode> {
    match state.workflows.load(&id).await {
        Ok(Some(workflow)) => Ok(Json(workflow)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to get workflow {}: {}", id, e);
            Err(StatusCode::BAD_REQUEST)
        }
    }
}

/// Replace an existing workflow
///
/// PUT /api/workflows/{id}
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CreateWorkflowRequest>,
) -> Result<Json<WorkflowResponse>, StatusCode> {
    let mut workflow = payload.workflow;
    workflow.id = id.clone();
    validate(&workflow)?;

    match state.workflows.load(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(_) => return Err(StatusCode::BAD_REQUEST),
    }

    if let Err(e) = state.workflows.save(&workflow).await {
        tracing::error!("Failed to update workflow: {}", e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    tracing::info!("🔥 Updated workflow: {} ({})", workflow.id, workflow.name);
    Ok(Json(WorkflowResponse {
        id: workflow.id.clone(),
        message: format!("Workflow '{}' updated successfully", workflow.name),
    }))
}

/// DELETE /api/workflows/{id}
///
/// Schedules pointing at the workflow stay; their next run is recorded as a failure.
async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    match state.workflows.delete(&id).await {
        Ok(true) => {
            tracing::info!("🗑️ Deleted workflow: {}", id);
            Ok(Json(json!({ "message": "Workflow deleted successfully" })))
        }
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to delete workflow: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Run a stored workflow
///
/// POST /api/workflows/{id}/execute
/// Body: { "variables": {...}, "debug": false, "breakpoints": [...] }
///
/// Without `debug` the call waits for the run and returns its final state.
/// With `debug` a session is attached before the first node and the run
/// continues in the background; drive it through `/api/debug/sessions`.
async fn execute_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ExecuteWorkflowRequest>,
) -> Result<Json<Value>, StatusCode> {
    let workflow = match state.workflows.load(&id).await {
        Ok(Some(workflow)) => workflow,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(_) => return Err(StatusCode::BAD_REQUEST),
    };

    let execution_id = state
        .engine
        .prepare_execution(&workflow, payload.variables, Some("api".to_string()))
        .await;

    if payload.debug {
        let session_id = match state
            .debugger
            .start_debug_session(&execution_id, &workflow.id, payload.breakpoints)
            .await
        {
            Ok(session_id) => session_id,
            Err(e) => {
                tracing::warn!("⚠️ Rejected debug run of {}: {}", workflow.id, e);
                return Err(StatusCode::BAD_REQUEST);
            }
        };

        let engine = state.engine.clone();
        let run_id = execution_id.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run_execution(&run_id, &workflow).await {
                tracing::warn!("⚠️ Debug run {} failed: {}", run_id, e);
            }
        });

        return Ok(Json(json!({
            "execution_id": execution_id,
            "session_id": session_id,
            "status": "running",
        })));
    }

    let outcome = state.engine.run_execution(&execution_id, &workflow).await;
    let execution = state.engine.get_workflow_execution_state(&execution_id).await;
    Ok(Json(json!({
        "execution_id": execution_id,
        "status": execution.as_ref().map(|e| e.status),
        "error": outcome.err().map(|e| e.to_string()),
        "execution": execution,
    })))
}

/// GET /api/executions
async fn list_executions(State(state): State<AppState>) -> Json<Value> {
    let executions = state.engine.state_manager().list_executions().await;
    Json(json!({ "executions": executions }))
}

/// GET /api/executions/{id}
async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionState>, StatusCode> {
    state
        .engine
        .get_workflow_execution_state(&id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
