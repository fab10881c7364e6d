/// Mechaflow: workflow orchestration core
///
/// This library provides a petgraph-based workflow execution engine with an
/// interactive debugger and a background scheduler daemon, exposed over an
/// axum HTTP API.

// Core configuration and setup
pub mod config;

// Typed engine, debugger and expression errors
pub mod error;

// Workflow definitions, execution state types and JSON storage
pub mod workflow;

// Schedule definitions, due-ness and execution history
pub mod schedule;

// Runtime: state manager, engine, handlers, debugger, scheduler daemon
pub mod runtime;

// HTTP API layer - REST endpoints for workflows, debug sessions and schedules
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{DebuggerError, EngineError, ExpressionError};
pub use runtime::{SchedulerDaemon, WorkflowDebugger, WorkflowExecutionEngine, WorkflowStateManager};
pub use server::start_server;
pub use workflow::{NodeConfig, NodeKind, WorkflowDefinition};
