/// Workflow Definition Layer
///
/// This module handles workflow definitions and their persistence:
/// - Type definitions (WorkflowDefinition, NodeConfig, NodeKind, ExecutionState)
/// - JSON document storage behind the `EntityStore` trait

// Core workflow type definitions
pub mod types;

// JSON file persistence shared with schedules
pub mod storage;

// Re-export commonly used types
pub use storage::{Entity, EntityStore, JsonFileStore};
pub use types::{ExecutionState, NodeConfig, NodeKind, Variables, WorkflowDefinition, WorkflowStatus};
