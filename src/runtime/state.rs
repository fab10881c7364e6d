/// Execution state bookkeeping
///
/// `WorkflowStateManager` is the single owner of every run's `ExecutionState`
/// and of the per-node status table. Callers only ever see cloned snapshots.

use crate::workflow::types::{
    ExecutionContext, ExecutionState, NodeStatus, Variables, WorkflowStatus,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct StateTables {
    executions: HashMap<String, ExecutionState>,
    /// execution_id -> node_id -> status
    node_statuses: HashMap<String, HashMap<String, NodeStatus>>,
}

/// In-memory authority for execution state
#[derive(Debug, Default)]
pub struct WorkflowStateManager {
    tables: RwLock<StateTables>,
}

impl WorkflowStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending execution and return its id
    pub async fn create_execution(
        &self,
        workflow_id: &str,
        variables: Variables,
        triggered_by: Option<String>,
    ) -> String {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let state = ExecutionState {
            execution_id: execution_id.clone(),
            workflow_id: workflow_id.to_string(),
            status: WorkflowStatus::Pending,
            started_at: now,
            completed_at: None,
            variables,
            context: ExecutionContext {
                triggered_by,
                execution_id: execution_id.clone(),
                created_at: now,
            },
            current_nodes: BTreeSet::new(),
            completed_nodes: BTreeSet::new(),
            failed_nodes: BTreeSet::new(),
            node_results: BTreeMap::new(),
            error: None,
        };

        let mut tables = self.tables.write().await;
        tables.executions.insert(execution_id.clone(), state);
        tables.node_statuses.insert(execution_id.clone(), HashMap::new());
        tracing::debug!("🆕 Created execution {} for workflow {}", execution_id, workflow_id);
        execution_id
    }

    pub async fn get_execution_state(&self, execution_id: &str) -> Option<ExecutionState> {
        self.tables.read().await.executions.get(execution_id).cloned()
    }

    /// Set the run status; terminal statuses stamp `completed_at`
    pub async fn update_execution_status(&self, execution_id: &str, status: WorkflowStatus) {
        let mut tables = self.tables.write().await;
        if let Some(state) = tables.executions.get_mut(execution_id) {
            state.status = status;
            if status.is_terminal() {
                state.completed_at = Some(Utc::now());
            }
        }
    }

    /// Record a node status and keep the current/completed/failed sets disjoint
    pub async fn update_node_status(&self, execution_id: &str, node_id: &str, status: NodeStatus) {
        let mut tables = self.tables.write().await;
        if let Some(statuses) = tables.node_statuses.get_mut(execution_id) {
            statuses.insert(node_id.to_string(), status);
        }

        let Some(state) = tables.executions.get_mut(execution_id) else {
            return;
        };
        state.current_nodes.remove(node_id);
        state.completed_nodes.remove(node_id);
        state.failed_nodes.remove(node_id);
        match status {
            NodeStatus::Running => {
                state.current_nodes.insert(node_id.to_string());
            }
            NodeStatus::Completed => {
                state.completed_nodes.insert(node_id.to_string());
            }
            NodeStatus::Failed => {
                state.failed_nodes.insert(node_id.to_string());
            }
            NodeStatus::Pending | NodeStatus::Skipped => {}
        }
    }

    pub async fn get_node_status(&self, execution_id: &str, node_id: &str) -> Option<NodeStatus> {
        self.tables
            .read()
            .await
            .node_statuses
            .get(execution_id)
            .and_then(|statuses| statuses.get(node_id))
            .copied()
    }

    pub async fn set_node_result(&self, execution_id: &str, node_id: &str, result: Value) {
        let mut tables = self.tables.write().await;
        if let Some(state) = tables.executions.get_mut(execution_id) {
            state.node_results.insert(node_id.to_string(), result);
        }
    }

    /// Replace the variables map wholesale
    pub async fn update_variables(&self, execution_id: &str, variables: Variables) {
        let mut tables = self.tables.write().await;
        if let Some(state) = tables.executions.get_mut(execution_id) {
            state.variables = variables;
        }
    }

    pub async fn set_error(&self, execution_id: &str, message: impl Into<String>) {
        let mut tables = self.tables.write().await;
        if let Some(state) = tables.executions.get_mut(execution_id) {
            state.error = Some(message.into());
        }
    }

    /// Snapshots of every known execution, newest first
    pub async fn list_executions(&self) -> Vec<ExecutionState> {
        let mut all: Vec<ExecutionState> =
            self.tables.read().await.executions.values().cloned().collect();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn node_sets_stay_disjoint() {
        let manager = WorkflowStateManager::new();
        let id = manager.create_execution("wf", Variables::new(), None).await;

        manager.update_node_status(&id, "a", NodeStatus::Running).await;
        let state = manager.get_execution_state(&id).await.unwrap();
        assert!(state.current_nodes.contains("a"));

        manager.update_node_status(&id, "a", NodeStatus::Completed).await;
        let state = manager.get_execution_state(&id).await.unwrap();
        assert!(!state.current_nodes.contains("a"));
        assert!(state.completed_nodes.contains("a"));

        manager.update_node_status(&id, "a", NodeStatus::Failed).await;
        let state = manager.get_execution_state(&id).await.unwrap();
        assert!(!state.completed_nodes.contains("a"));
        assert!(state.failed_nodes.contains("a"));

        manager.update_node_status(&id, "a", NodeStatus::Skipped).await;
        let state = manager.get_execution_state(&id).await.unwrap();
        assert!(state.current_nodes.is_empty());
        assert!(state.completed_nodes.is_empty());
        assert!(state.failed_nodes.is_empty());
        assert_eq!(manager.get_node_status(&id, "a").await, Some(NodeStatus::Skipped));
    }

    #[tokio::test]
    async fn terminal_status_sets_completed_at() {
        let manager = WorkflowStateManager::new();
        let id = manager
            .create_execution("wf", Variables::new(), Some("scheduler".into()))
            .await;

        let state = manager.get_execution_state(&id).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Pending);
        assert_eq!(state.context.triggered_by.as_deref(), Some("scheduler"));

        manager.update_execution_status(&id, WorkflowStatus::Running).await;
        assert!(manager.get_execution_state(&id).await.unwrap().completed_at.is_none());

        manager.update_execution_status(&id, WorkflowStatus::Failed).await;
        assert!(manager.get_execution_state(&id).await.unwrap().completed_at.is_some());
    }

    #[tokio::test]
    async fn variables_are_replaced_not_merged() {
        let manager = WorkflowStateManager::new();
        let mut initial = Variables::new();
        initial.insert("a".into(), json!(1));
        let id = manager.create_execution("wf", initial, None).await;

        let mut next = Variables::new();
        next.insert("b".into(), json!(2));
        manager.update_variables(&id, next).await;

        let state = manager.get_execution_state(&id).await.unwrap();
        assert!(state.variables.get("a").is_none());
        assert_eq!(state.variables["b"], json!(2));
    }

    #[tokio::test]
    async fn writes_to_unknown_execution_are_ignored() {
        let manager = WorkflowStateManager::new();
        manager.update_node_status("missing", "a", NodeStatus::Running).await;
        manager.set_node_result("missing", "a", json!(null)).await;
        assert!(manager.get_execution_state("missing").await.is_none());
        assert!(manager.list_executions().await.is_empty());
    }
}
