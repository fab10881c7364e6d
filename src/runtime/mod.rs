/// Runtime Execution Layer
///
/// This module provides everything that happens while workflows run:
/// - Execution state bookkeeping
/// - Petgraph-based graph traversal
/// - Node handler registry and built-in handlers
/// - Interactive debugging
/// - The scheduler daemon

// Per-execution state owned by the engine
pub mod state;

// Graph traversal and node dispatch
pub mod engine;

// Built-in node handlers
pub mod executor;

// Handler lookup by node type string
pub mod registry;

// Breakpoints, stepping and variable inspection
pub mod debugger;

// `${var}` interpolation and condition expressions
pub mod expression;

// Event bus and broadcast bridge
pub mod events;

// Background schedule evaluation
pub mod scheduler;

// Re-export main types
pub use debugger::{Breakpoint, BreakpointType, WorkflowDebugger};
pub use engine::WorkflowExecutionEngine;
pub use events::{Broadcaster, EventBus, LoggingBroadcaster};
pub use executor::NodeExecutor;
pub use registry::{NodeContext, NodeHandler, NodeHandlerRegistry};
pub use scheduler::SchedulerDaemon;
pub use state::WorkflowStateManager;
