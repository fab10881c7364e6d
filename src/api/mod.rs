/// HTTP API Layer
///
/// This module provides the REST API endpoints over the orchestration core:
/// - Workflow CRUD, execution triggering and execution state
/// - Debug session control
/// - Schedule CRUD and scheduler daemon status

use crate::runtime::{SchedulerDaemon, WorkflowDebugger, WorkflowExecutionEngine};
use crate::schedule::ScheduledWorkflow;
use crate::workflow::{JsonFileStore, WorkflowDefinition};
use std::sync::Arc;

// Workflow management and execution endpoints
pub mod workflows;

// Debug session endpoints
pub mod debug;

// Schedule management and daemon status endpoints
pub mod schedules;

/// Application state shared by every router
#[derive(Clone)]
pub struct AppState {
    /// Workflow definitions, one JSON document each
    pub workflows: Arc<JsonFileStore<WorkflowDefinition>>,
    /// Schedule definitions, one JSON document each
    pub schedules: Arc<JsonFileStore<ScheduledWorkflow>>,
    pub engine: Arc<WorkflowExecutionEngine>,
    pub debugger: Arc<WorkflowDebugger>,
    pub daemon: Arc<SchedulerDaemon>,
}

// Re-export router builders
pub use debug::create_debug_routes;
pub use schedules::create_schedule_routes;
pub use workflows::create_workflow_routes;
