/// Domain error types
///
/// Engine and debugger failures are typed so callers (the HTTP layer, the
/// scheduler daemon) can tell a missing session from a failed node. Handler
/// and storage plumbing stays on `anyhow`.

use thiserror::Error;

/// Failures surfaced by `WorkflowExecutionEngine`
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No start nodes found in workflow")]
    NoStartNode,
    #[error("Node {node_id} failed: {message}")]
    NodeFailed { node_id: String, message: String },
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),
}

/// Failures surfaced by `WorkflowDebugger`
#[derive(Debug, Error)]
pub enum DebuggerError {
    #[error("Debug session {0} not found")]
    SessionNotFound(String),
    #[error("Breakpoint {0} not found")]
    BreakpointNotFound(String),
    #[error("Watch expression {0} not found")]
    WatchNotFound(String),
    #[error("Variable path '{0}' not found")]
    VariableNotFound(String),
    #[error("Nested variable setting is not supported: {0}")]
    NestedVariableWrite(String),
    #[error("Invalid hit condition '{0}': expected >=N, ==N or %N")]
    InvalidHitCondition(String),
    #[error("Invalid breakpoint condition: {0}")]
    InvalidCondition(#[from] ExpressionError),
    #[error("Failed to export debug data: {0}")]
    Export(String),
}

/// Condition expression parse failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("unterminated {0} starting at position {1}")]
    Unterminated(&'static str, usize),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),
    #[error("empty expression")]
    Empty,
}
