/// Schedule management REST API endpoints
///
/// CRUD over stored schedules, manual triggering, per-day history and the
/// scheduler daemon's status.

use crate::api::AppState;
use crate::schedule::{timing, ScheduleExecution, ScheduledWorkflow, TriggerType};
use crate::workflow::EntityStore;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

/// Request body for schedule creation
#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub workflow_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub interval_seconds: Option<u64>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_runs: Option<u64>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CreateScheduleRequest {
    fn into_schedule(self) -> ScheduledWorkflow {
        let mut schedule = ScheduledWorkflow::new(self.workflow_id, self.name, self.trigger_type);
        schedule.description = self.description;
        schedule.cron_expression = self.cron_expression;
        if let Some(timezone) = self.timezone {
            schedule.timezone = timezone;
        }
        schedule.interval_seconds = self.interval_seconds;
        schedule.start_date = self.start_date;
        schedule.end_date = self.end_date;
        schedule.max_runs = self.max_runs;
        schedule.enabled = self.enabled.unwrap_or(true);
        schedule.tags = self.tags;
        schedule.next_run = timing::next_run(&schedule, Utc::now());
        schedule
    }
}

/// Create schedule and scheduler routes
pub fn create_schedule_routes() -> Router<AppState> {
    Router::new()
        .route("/api/schedules", post(create_schedule).get(list_schedules))
        .route("/api/schedules/{id}", get(get_schedule).delete(delete_schedule))
        .route("/api/schedules/{id}/trigger", post(trigger_schedule))
        .route("/api/schedules/{id}/history/{day}", get(get_history))
        .route("/api/scheduler/status", get(scheduler_status))
        .route("/api/scheduler/executions", get(active_executions))
}

/// Accepts `YYYYMMDD` or `YYYY-MM-DD`
fn parse_day(day: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(day, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(day, "%Y-%m-%d"))
        .ok()
}

/// POST /api/schedules
/// Body: { "workflow_id": "...", "name": "...", "trigger_type": "cron", "cron_expression": "*/5 * * * *" }
async fn create_schedule(
    State(state): State<AppState>,
    Json(payload): Json<CreateScheduleRequest>,
) -> Result<Json<ScheduledWorkflow>, StatusCode> {
    let schedule = payload.into_schedule();
    if let Err(e) = schedule.validate() {
        tracing::warn!("⚠️ Rejected schedule '{}': {}", schedule.name, e);
        return Err(StatusCode::BAD_REQUEST);
    }

    match state.workflows.load(&schedule.workflow_id).await {
        Ok(Some(_)) => {}
        Ok(None) | Err(_) => return Err(StatusCode::BAD_REQUEST),
    }

    if let Err(e) = state.schedules.save(&schedule).await {
        tracing::error!("Failed to save schedule: {}", e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    tracing::info!("📅 Created schedule: {} ({}) for workflow {}", schedule.id, schedule.name, schedule.workflow_id);
    Ok(Json(schedule))
}

/// GET /api/schedules
async fn list_schedules(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    match state.schedules.list_all().await {
        Ok(mut schedules) => {
            schedules.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(Json(json!({ "schedules": schedules })))
        }
        Err(e) => {
            tracing::error!("Failed to list schedules: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ScheduledWorkflow>, StatusCode> {
    match state.schedules.load(&id).await {
        Ok(Some(schedule)) => Ok(Json(schedule)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::BAD_REQUEST),
    }
}

async fn delete_schedule(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    match state.schedules.delete(&id).await {
        Ok(true) => {
            tracing::info!("🗑️ Deleted schedule: {}", id);
            Ok(Json(json!({ "message": "Schedule deleted successfully" })))
        }
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to delete schedule: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /api/schedules/{id}/trigger
async fn trigger_schedule(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    match state.schedules.load(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(_) => return Err(StatusCode::BAD_REQUEST),
    }

    match state.daemon.trigger_now(&id).await {
        Ok(execution_id) => Ok(Json(json!({ "schedule_id": id, "execution_id": execution_id }))),
        Err(e) => {
            tracing::error!("Failed to trigger schedule {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/schedules/{id}/history/{day}
async fn get_history(
    State(state): State<AppState>,
    Path((id, day)): Path<(String, String)>,
) -> Result<Json<Vec<ScheduleExecution>>, StatusCode> {
    let day = parse_day(&day).ok_or(StatusCode::BAD_REQUEST)?;
    match state.daemon.history().read(&id, day).await {
        Ok(records) => Ok(Json(records)),
        Err(e) => {
            tracing::error!("Failed to read history for schedule {}: {}", id, e);
            Err(StatusCode::BAD_REQUEST)
        }
    }
}

/// GET /api/scheduler/status
async fn scheduler_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.daemon.get_status().await))
}

/// GET /api/scheduler/executions
async fn active_executions(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "executions": state.daemon.get_active_executions().await }))
}
