/// Core workflow type definitions
///
/// Defines workflow definitions, node configuration, and the per-run execution
/// state. These types are serialized/deserialized from JSON for persistence
/// and for the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Mutable scratch space shared by every node of one execution
pub type Variables = serde_json::Map<String, Value>;

/// A complete workflow definition: a graph of typed nodes
///
/// Nodes are keyed by id; each node lists the ids of its successors in
/// `connections`. Execution begins at every node of type `start`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    /// Unique workflow identifier
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Default input variables used when the scheduler triggers a run
    #[serde(default)]
    pub variables: Variables,
    /// node_id -> node configuration
    pub nodes: BTreeMap<String, NodeConfig>,
}

impl WorkflowDefinition {
    /// Ids of all `start` nodes, in key order
    pub fn start_nodes(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.kind == NodeKind::Start)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// A single node in the workflow graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// The type of node which determines execution behavior
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Display name, defaults to "{type}_{id}" when empty
    #[serde(default)]
    pub name: String,
    /// Node-specific configuration parameters
    #[serde(default = "empty_object")]
    pub config: Value,
    /// Successor node ids
    #[serde(default)]
    pub connections: Vec<String>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl NodeConfig {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            name: String::new(),
            config: empty_object(),
            connections: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn connect(mut self, target: impl Into<String>) -> Self {
        self.connections.push(target.into());
        self
    }

    pub fn display_name(&self, node_id: &str) -> String {
        if self.name.is_empty() {
            format!("{}_{}", self.kind, node_id)
        } else {
            self.name.clone()
        }
    }

    /// String parameter from `config`
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }
}

/// Available node kinds
///
/// Built-in kinds are a closed set; anything else is `Custom` and must be
/// resolved through the handler registry. Serialized as the plain type string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    /// Entry point. Expected params: none
    Start,
    /// Terminal marker. Expected params: { "message": "Workflow completed" }
    End,
    BrowserOpen,
    BrowserNavigate,
    BrowserExtract,
    BrowserClose,
    ExcelRead,
    ExcelWrite,
    EmailSend,
    /// Expected params: { "directory": "...", "pattern": "*.csv", "variable_name": "file_list" }
    FileScan,
    /// Expected params: { "directory": "..." }
    FileMkdir,
    /// Expected params: { "source": "...", "destination": "..." }
    FileMove,
    /// Expected params: { "file_path": "...", "content": "variable name or literal" }
    FileWrite,
    /// Expected params: { "url": "...", "method": "GET", "headers": {...}, "body": ..., "response_variable": "http_response" }
    HttpRequest,
    /// Embedded script, interpreted as Lua. Type string `python_script`,
    /// with `script` accepted as an alias.
    /// Expected params: { "script": "total = count * 2" }
    Script,
    /// Expected params: { "condition": "${status} == ok", "result_variable": "..." }
    Condition,
    /// Expected params: { "items": [...] | "variable_name" }
    Loop,
    LoopEnd,
    /// Expected params: { "template": "Hello ${name}", "output_variable": "rendered_content" }
    TemplateRender,
    /// Expected params: { "level": "info", "message": "..." }
    Log,
    /// Expected params: { "connection_string": "sqlite::memory:", "connection_variable": "db_connection" }
    DatabaseConnect,
    /// Expected params: { "connection": "db_connection", "query": "...", "result_variable": "query_result" }
    DatabaseQuery,
    /// Expected params: { "connection": "db_connection", "query": "..." }
    DatabaseExecute,
    /// Expected params: { "connection": "db_connection", "table": "...", "data_source": "variable name" }
    DatabaseBulkInsert,
    /// Expected params: { "connection": "db_connection" }
    DatabaseClose,
    /// Extension effect resolved through the handler registry
    Custom(String),
}

impl NodeKind {
    /// Every built-in kind, in registry order
    pub const BUILTIN: [NodeKind; 25] = [
        NodeKind::Start,
        NodeKind::End,
        NodeKind::BrowserOpen,
        NodeKind::BrowserNavigate,
        NodeKind::BrowserExtract,
        NodeKind::BrowserClose,
        NodeKind::ExcelRead,
        NodeKind::ExcelWrite,
        NodeKind::EmailSend,
        NodeKind::FileScan,
        NodeKind::FileMkdir,
        NodeKind::FileMove,
        NodeKind::FileWrite,
        NodeKind::HttpRequest,
        NodeKind::Script,
        NodeKind::Condition,
        NodeKind::Loop,
        NodeKind::LoopEnd,
        NodeKind::TemplateRender,
        NodeKind::Log,
        NodeKind::DatabaseConnect,
        NodeKind::DatabaseQuery,
        NodeKind::DatabaseExecute,
        NodeKind::DatabaseBulkInsert,
        NodeKind::DatabaseClose,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::Start => "start",
            NodeKind::End => "end",
            NodeKind::BrowserOpen => "browser_open",
            NodeKind::BrowserNavigate => "browser_navigate",
            NodeKind::BrowserExtract => "browser_extract",
            NodeKind::BrowserClose => "browser_close",
            NodeKind::ExcelRead => "excel_read",
            NodeKind::ExcelWrite => "excel_write",
            NodeKind::EmailSend => "email_send",
            NodeKind::FileScan => "file_scan",
            NodeKind::FileMkdir => "file_mkdir",
            NodeKind::FileMove => "file_move",
            NodeKind::FileWrite => "file_write",
            NodeKind::HttpRequest => "http_request",
            NodeKind::Script => "python_script",
            NodeKind::Condition => "condition",
            NodeKind::Loop => "loop",
            NodeKind::LoopEnd => "loop_end",
            NodeKind::TemplateRender => "template_render",
            NodeKind::Log => "log",
            NodeKind::DatabaseConnect => "database_connect",
            NodeKind::DatabaseQuery => "database_query",
            NodeKind::DatabaseExecute => "database_execute",
            NodeKind::DatabaseBulkInsert => "database_bulk_insert",
            NodeKind::DatabaseClose => "database_close",
            NodeKind::Custom(name) => name,
        }
    }
}

impl From<String> for NodeKind {
    fn from(value: String) -> Self {
        if value == "script" {
            return NodeKind::Script;
        }
        NodeKind::BUILTIN
            .iter()
            .find(|kind| kind.as_str() == value)
            .cloned()
            .unwrap_or(NodeKind::Custom(value))
    }
}

impl From<&str> for NodeKind {
    fn from(value: &str) -> Self {
        NodeKind::from(value.to_string())
    }
}

impl From<NodeKind> for String {
    fn from(value: NodeKind) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
            WorkflowStatus::Paused => "paused",
        }
    }
}

/// Per-(execution, node) status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// How an execution was created
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionContext {
    pub triggered_by: Option<String>,
    pub execution_id: String,
    pub created_at: DateTime<Utc>,
}

/// Current state of one workflow run
///
/// Owned by `WorkflowStateManager`; everything else sees cloned snapshots.
/// A node id belongs to at most one of `current_nodes`, `completed_nodes`
/// and `failed_nodes`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionState {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub variables: Variables,
    pub context: ExecutionContext,
    pub current_nodes: BTreeSet<String>,
    pub completed_nodes: BTreeSet<String>,
    pub failed_nodes: BTreeSet<String>,
    pub node_results: BTreeMap<String, Value>,
    /// Message of the failure that ended the run
    pub error: Option<String>,
}
