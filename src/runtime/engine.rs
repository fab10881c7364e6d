/// Petgraph-based workflow execution engine
///
/// Converts a workflow definition into a directed graph and walks it
/// breadth-first from every `start` node. Cycles and diamonds are safe: one
/// visited set is shared by the whole run, so each node executes at most
/// once. Every transition is recorded in the state manager, announced on the
/// event bus and, when a debug session is attached, offered to the debugger.

use crate::error::EngineError;
use crate::runtime::debugger::{BreakpointType, NodeSite, WorkflowDebugger};
use crate::runtime::events::{broadcast_best_effort, Broadcaster, EventBus};
use crate::runtime::executor::NodeExecutor;
use crate::runtime::expression::interpolate_value;
use crate::runtime::registry::{NodeContext, NodeHandlerRegistry};
use crate::runtime::state::WorkflowStateManager;
use crate::workflow::types::{
    ExecutionState, NodeConfig, NodeStatus, Variables, WorkflowDefinition, WorkflowStatus,
};
use chrono::Utc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Graph orchestration over the node handler registry
pub struct WorkflowExecutionEngine {
    state: Arc<WorkflowStateManager>,
    registry: Arc<NodeHandlerRegistry>,
    executor: Arc<NodeExecutor>,
    event_bus: Arc<EventBus>,
    debugger: Option<Arc<WorkflowDebugger>>,
    broadcaster: Option<Arc<dyn Broadcaster>>,
}

impl std::fmt::Debug for WorkflowExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowExecutionEngine")
            .field("registry", &self.registry)
            .field("debugger", &self.debugger.is_some())
            .field("broadcaster", &self.broadcaster.is_some())
            .finish()
    }
}

/// Internal representation of a workflow as a petgraph digraph
#[derive(Debug)]
struct WorkflowGraph {
    /// Node weights are node ids
    graph: DiGraph<String, ()>,
    node_id_to_index: HashMap<String, NodeIndex>,
}

impl WorkflowGraph {
    /// Build nodes and edges; connections to unknown ids are dropped with a warning
    fn build(workflow: &WorkflowDefinition) -> Self {
        tracing::debug!("🏗️ Building workflow graph for '{}' ({} nodes)", workflow.id, workflow.nodes.len());

        let mut graph = DiGraph::new();
        let mut node_id_to_index = HashMap::new();
        for node_id in workflow.nodes.keys() {
            let index = graph.add_node(node_id.clone());
            node_id_to_index.insert(node_id.clone(), index);
        }

        for (node_id, node) in &workflow.nodes {
            let from = node_id_to_index[node_id];
            for target in &node.connections {
                match node_id_to_index.get(target) {
                    Some(&to) => {
                        graph.add_edge(from, to, ());
                        tracing::debug!("  🔗 Added edge: '{}' → '{}'", node_id, target);
                    }
                    None => tracing::warn!(
                        "⚠️ Node '{}' connects to unknown node '{}', skipping",
                        node_id,
                        target
                    ),
                }
            }
        }

        Self {
            graph,
            node_id_to_index,
        }
    }

    /// Successors in the order their connections were declared
    fn successors(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut edges: Vec<_> = self.graph.edges(index).collect();
        edges.sort_by_key(|edge| edge.id());
        edges.into_iter().map(|edge| edge.target()).collect()
    }
}

impl WorkflowExecutionEngine {
    /// Engine with every built-in handler registered
    pub fn new(event_bus: Arc<EventBus>, state: Arc<WorkflowStateManager>) -> Self {
        let registry = Arc::new(NodeHandlerRegistry::new());
        let executor = Arc::new(NodeExecutor::new(Arc::clone(&event_bus)));
        executor.register_builtins(&registry);
        Self {
            state,
            registry,
            executor,
            event_bus,
            debugger: None,
            broadcaster: None,
        }
    }

    pub fn with_debugger(mut self, debugger: Arc<WorkflowDebugger>) -> Self {
        self.debugger = Some(debugger);
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn registry(&self) -> &Arc<NodeHandlerRegistry> {
        &self.registry
    }

    pub fn state_manager(&self) -> &Arc<WorkflowStateManager> {
        &self.state
    }

    pub fn executor(&self) -> &Arc<NodeExecutor> {
        &self.executor
    }

    pub fn debugger(&self) -> Option<&Arc<WorkflowDebugger>> {
        self.debugger.as_ref()
    }

    pub async fn get_workflow_execution_state(&self, execution_id: &str) -> Option<ExecutionState> {
        self.state.get_execution_state(execution_id).await
    }

    /// Create the execution record without running anything
    ///
    /// Variables default to the definition's own `variables`.
    pub async fn prepare_execution(
        &self,
        workflow: &WorkflowDefinition,
        variables: Option<Variables>,
        triggered_by: Option<String>,
    ) -> String {
        let variables = variables.unwrap_or_else(|| workflow.variables.clone());
        self.state.create_execution(&workflow.id, variables, triggered_by).await
    }

    /// Create and run an execution to completion
    pub async fn execute_workflow(
        &self,
        workflow: &WorkflowDefinition,
        variables: Option<Variables>,
        triggered_by: Option<String>,
    ) -> Result<String, EngineError> {
        let execution_id = self.prepare_execution(workflow, variables, triggered_by).await;
        self.run_execution(&execution_id, workflow).await?;
        Ok(execution_id)
    }

    /// Run a prepared execution
    ///
    /// The final status, error and events are recorded before returning.
    pub async fn run_execution(&self, execution_id: &str, workflow: &WorkflowDefinition) -> Result<(), EngineError> {
        if self.state.get_execution_state(execution_id).await.is_none() {
            return Err(EngineError::ExecutionNotFound(execution_id.to_string()));
        }
        let run_start = std::time::Instant::now();

        tracing::info!("🚀 Starting workflow execution: {} ({})", workflow.id, execution_id);
        self.event_bus
            .emit(
                "workflow.execution.started",
                json!({ "execution_id": execution_id, "workflow_id": workflow.id }),
            )
            .await;
        self.broadcast(json!({
            "type": "workflow_started",
            "execution_id": execution_id,
            "workflow_id": workflow.id,
            "workflow_name": workflow.name,
        }))
        .await;
        self.state
            .update_execution_status(execution_id, WorkflowStatus::Running)
            .await;

        match self.traverse(execution_id, workflow).await {
            Ok(()) => {
                self.state
                    .update_execution_status(execution_id, WorkflowStatus::Completed)
                    .await;
                tracing::info!(
                    "🎉 Workflow '{}' execution completed successfully in {:?}",
                    workflow.id,
                    run_start.elapsed()
                );
                self.event_bus
                    .emit(
                        "workflow.execution.completed",
                        json!({ "execution_id": execution_id, "workflow_id": workflow.id }),
                    )
                    .await;
                self.broadcast(json!({
                    "type": "workflow_completed",
                    "execution_id": execution_id,
                    "workflow_id": workflow.id,
                }))
                .await;
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                self.state.set_error(execution_id, message.clone()).await;
                self.state
                    .update_execution_status(execution_id, WorkflowStatus::Failed)
                    .await;
                tracing::error!("❌ Workflow '{}' execution failed: {}", workflow.id, message);
                self.event_bus
                    .emit(
                        "workflow.execution.failed",
                        json!({ "execution_id": execution_id, "workflow_id": workflow.id, "error": message }),
                    )
                    .await;
                self.broadcast(json!({
                    "type": "workflow_failed",
                    "execution_id": execution_id,
                    "workflow_id": workflow.id,
                    "error": message,
                }))
                .await;
                Err(e)
            }
        }
    }

    async fn broadcast(&self, message: Value) {
        broadcast_best_effort(self.broadcaster.as_deref(), message).await;
    }

    /// BFS from each start node with one shared visited set
    async fn traverse(&self, execution_id: &str, workflow: &WorkflowDefinition) -> Result<(), EngineError> {
        let start_nodes = workflow.start_nodes();
        if start_nodes.is_empty() {
            return Err(EngineError::NoStartNode);
        }

        let graph = WorkflowGraph::build(workflow);
        let session_id = match &self.debugger {
            Some(debugger) => debugger.session_for_execution(execution_id).await,
            None => None,
        };
        if let Some(session_id) = &session_id {
            tracing::info!("🐞 Execution {} running under debug session {}", execution_id, session_id);
        }

        let mut visited: HashSet<NodeIndex> = HashSet::new();
        for start in start_nodes {
            let mut queue = VecDeque::from([graph.node_id_to_index[start]]);
            while let Some(index) = queue.pop_front() {
                if !visited.insert(index) {
                    continue;
                }
                let node_id = &graph.graph[index];
                let node = &workflow.nodes[node_id];
                self.execute_node(execution_id, node_id, node, session_id.as_deref())
                    .await?;

                for next in graph.successors(index) {
                    if !visited.contains(&next) {
                        queue.push_back(next);
                    }
                }
            }
        }

        tracing::debug!("📋 Executed {} nodes", visited.len());
        Ok(())
    }

    async fn current_variables(&self, execution_id: &str) -> Result<Variables, EngineError> {
        self.state
            .get_execution_state(execution_id)
            .await
            .map(|state| state.variables)
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))
    }

    /// Offer a check to the debugger, then apply writes made while paused
    async fn debug_check(
        &self,
        execution_id: &str,
        session_id: Option<&str>,
        site: &NodeSite,
        check: BreakpointType,
        variables: &Variables,
        error_info: Option<Value>,
    ) -> Result<(), EngineError> {
        let (Some(debugger), Some(session_id)) = (&self.debugger, session_id) else {
            return Ok(());
        };
        if !debugger
            .check_breakpoints(session_id, site, check, variables, error_info)
            .await
        {
            return Ok(());
        }

        let writes = debugger.take_pending_writes(session_id).await;
        if !writes.is_empty() {
            let mut current = self.current_variables(execution_id).await?;
            tracing::info!("✏️ Applying {} debugger variable write(s)", writes.len());
            current.extend(writes);
            self.state.update_variables(execution_id, current).await;
        }
        Ok(())
    }

    async fn execute_node(
        &self,
        execution_id: &str,
        node_id: &str,
        node: &NodeConfig,
        session_id: Option<&str>,
    ) -> Result<(), EngineError> {
        let site = NodeSite::new(node_id, &node.display_name(node_id), node.kind.as_str());
        tracing::info!("📍 Executing node '{}' (type: {})", node_id, node.kind);

        self.state
            .update_node_status(execution_id, node_id, NodeStatus::Running)
            .await;
        self.event_bus
            .emit(
                "workflow.node.started",
                json!({ "execution_id": execution_id, "node_id": node_id, "node_type": node.kind }),
            )
            .await;
        self.broadcast(json!({
            "type": "node_started",
            "execution_id": execution_id,
            "node_id": node_id,
            "node_type": node.kind,
            "node_name": site.node_name,
        }))
        .await;

        let before = self.current_variables(execution_id).await?;
        self.debug_check(execution_id, session_id, &site, BreakpointType::NodeStart, &before, None)
            .await?;

        // Re-read: the debugger may have written variables while paused
        let variables = self.current_variables(execution_id).await?;
        let mut ctx = NodeContext {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            kind: node.kind.clone(),
            config: interpolate_value(&node.config, &variables),
            raw_config: node.config.clone(),
            variables: variables.clone(),
        };

        let started_at = Utc::now();
        let node_start = std::time::Instant::now();
        let outcome = match self.registry.resolve(&node.kind) {
            Some(handler) => handler.execute(&mut ctx).await.map_err(|e| EngineError::NodeFailed {
                node_id: node_id.to_string(),
                message: e.to_string(),
            }),
            None => Err(EngineError::UnknownNodeType(node.kind.to_string())),
        };

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                let message = match &e {
                    EngineError::NodeFailed { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                tracing::error!("❌ Node '{}' failed: {}", node_id, message);
                self.state
                    .set_node_result(execution_id, node_id, json!({ "error": message }))
                    .await;
                self.state
                    .update_node_status(execution_id, node_id, NodeStatus::Failed)
                    .await;
                self.event_bus
                    .emit(
                        "workflow.node.failed",
                        json!({ "execution_id": execution_id, "node_id": node_id, "error": message }),
                    )
                    .await;
                self.broadcast(json!({
                    "type": "node_failed",
                    "execution_id": execution_id,
                    "node_id": node_id,
                    "node_type": node.kind,
                    "node_name": site.node_name,
                    "error": message,
                    "execution_time_ms": elapsed_ms(node_start),
                }))
                .await;
                let error_info = json!({ "error": message, "node_type": node.kind });
                self.debug_check(
                    execution_id,
                    session_id,
                    &site,
                    BreakpointType::NodeError,
                    &ctx.variables,
                    Some(error_info),
                )
                .await?;
                return Err(e);
            }
        };

        let delta: Variables = ctx
            .variables
            .iter()
            .filter(|(name, value)| variables.get(name.as_str()) != Some(value))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        self.state
            .set_node_result(execution_id, node_id, result.clone())
            .await;
        self.state
            .update_variables(execution_id, ctx.variables.clone())
            .await;
        self.state
            .update_node_status(execution_id, node_id, NodeStatus::Completed)
            .await;
        tracing::info!("✅ Node '{}' completed in {:?}", node_id, node_start.elapsed());
        self.event_bus
            .emit(
                "workflow.node.completed",
                json!({ "execution_id": execution_id, "node_id": node_id, "result": result }),
            )
            .await;
        self.broadcast(json!({
            "type": "node_completed",
            "execution_id": execution_id,
            "node_id": node_id,
            "node_type": node.kind,
            "node_name": site.node_name,
            "result": result,
            "execution_time_ms": elapsed_ms(node_start),
        }))
        .await;

        let ended_at = Utc::now();
        self.debug_check(execution_id, session_id, &site, BreakpointType::NodeEnd, &ctx.variables, None)
            .await?;
        if !delta.is_empty() {
            self.debug_check(execution_id, session_id, &site, BreakpointType::VariableChange, &delta, None)
                .await?;
        }
        if let (Some(debugger), Some(session_id)) = (&self.debugger, session_id) {
            let metrics = json!({ "node_type": node.kind, "variables_changed": delta.len() });
            if let Err(e) = debugger
                .capture_performance_data(session_id, node_id, started_at, ended_at, metrics)
                .await
            {
                tracing::debug!("Performance sample dropped: {}", e);
            }
        }
        Ok(())
    }
}

/// Milliseconds since `start`, rounded to two decimals
fn elapsed_ms(start: std::time::Instant) -> f64 {
    (start.elapsed().as_secs_f64() * 100_000.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::debugger::{Breakpoint, DebuggerState};
    use crate::runtime::registry::NodeHandler;
    use crate::workflow::types::NodeKind;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Records the order nodes ran in
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NodeHandler for Recorder {
        async fn execute(&self, ctx: &mut NodeContext) -> anyhow::Result<Value> {
            self.seen.lock().unwrap().push(ctx.node_id.clone());
            Ok(json!({ "config": ctx.config }))
        }
    }

    struct SetX;

    #[async_trait]
    impl NodeHandler for SetX {
        async fn execute(&self, ctx: &mut NodeContext) -> anyhow::Result<Value> {
            ctx.variables.insert("x".into(), json!(1));
            Ok(json!({ "status": "ok" }))
        }
    }

    struct Boom;

    #[async_trait]
    impl NodeHandler for Boom {
        async fn execute(&self, _ctx: &mut NodeContext) -> anyhow::Result<Value> {
            Err(anyhow::anyhow!("boom"))
        }
    }

    /// Keeps every broadcast message in order
    #[derive(Default)]
    struct RecordingBroadcaster {
        messages: Mutex<Vec<Value>>,
    }

    impl RecordingBroadcaster {
        fn types(&self) -> Vec<String> {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .map(|m| m["type"].as_str().unwrap_or_default().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl Broadcaster for RecordingBroadcaster {
        async fn broadcast(&self, message: Value) -> anyhow::Result<()> {
            self.messages.lock().unwrap().push(message);
            Ok(())
        }
    }

    fn engine() -> WorkflowExecutionEngine {
        WorkflowExecutionEngine::new(Arc::new(EventBus::new()), Arc::new(WorkflowStateManager::new()))
    }

    fn workflow(nodes: Vec<(&str, NodeConfig)>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: "wf".into(),
            name: "Test workflow".into(),
            description: String::new(),
            variables: Variables::new(),
            nodes: nodes
                .into_iter()
                .map(|(id, node)| (id.to_string(), node))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn record(target: &str) -> NodeConfig {
        NodeConfig::new(NodeKind::from("record")).connect(target)
    }

    #[tokio::test]
    async fn start_to_end_success() {
        let engine = engine();
        engine.registry().register("set_x", Arc::new(SetX));
        let wf = workflow(vec![
            ("start", NodeConfig::new(NodeKind::Start).connect("a")),
            ("a", NodeConfig::new(NodeKind::from("set_x")).connect("end")),
            ("end", NodeConfig::new(NodeKind::End)),
        ]);

        let id = engine.execute_workflow(&wf, None, Some("test".into())).await.unwrap();
        let state = engine.get_workflow_execution_state(&id).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert!(state.completed_at.is_some());
        assert_eq!(state.variables["x"], json!(1));
        assert_eq!(state.completed_nodes.len(), 3);
        assert!(state.current_nodes.is_empty());
        assert_eq!(state.node_results["a"]["status"], "ok");
    }

    #[tokio::test]
    async fn failing_node_aborts_the_run() {
        let bus = Arc::new(EventBus::new());
        let engine = WorkflowExecutionEngine::new(Arc::clone(&bus), Arc::new(WorkflowStateManager::new()));
        engine.registry().register("boom", Arc::new(Boom));
        engine.registry().register("record", Arc::new(Recorder::default()));
        let wf = workflow(vec![
            ("start", NodeConfig::new(NodeKind::Start).connect("a")),
            ("a", NodeConfig::new(NodeKind::from("boom")).connect("b")),
            ("b", NodeConfig::new(NodeKind::End)),
        ]);

        let execution_id = engine.prepare_execution(&wf, None, None).await;
        let err = engine.run_execution(&execution_id, &wf).await.unwrap_err();
        assert!(matches!(err, EngineError::NodeFailed { ref node_id, .. } if node_id == "a"));

        let state = engine.get_workflow_execution_state(&execution_id).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Failed);
        assert!(state.failed_nodes.contains("a"));
        assert!(!state.completed_nodes.contains("b"));
        assert!(state.error.as_deref().unwrap().contains("boom"));
        assert_eq!(bus.events_named("workflow.node.failed", 10).len(), 1);
        assert_eq!(bus.events_named("workflow.execution.failed", 10).len(), 1);
    }

    #[tokio::test]
    async fn node_progress_is_broadcast() {
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let engine = engine().with_broadcaster(broadcaster.clone());
        let wf = workflow(vec![
            ("start", NodeConfig::new(NodeKind::Start).connect("end")),
            ("end", NodeConfig::new(NodeKind::End)),
        ]);

        engine.execute_workflow(&wf, None, None).await.unwrap();
        assert_eq!(
            broadcaster.types(),
            vec![
                "workflow_started",
                "node_started",
                "node_completed",
                "node_started",
                "node_completed",
                "workflow_completed",
            ]
        );
        let messages = broadcaster.messages.lock().unwrap();
        assert_eq!(messages[2]["node_id"], "start");
        assert_eq!(messages[2]["node_type"], "start");
        assert!(messages[2]["execution_time_ms"].as_f64().unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn node_failure_is_broadcast() {
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let engine = engine().with_broadcaster(broadcaster.clone());
        engine.registry().register("boom", Arc::new(Boom));
        let wf = workflow(vec![
            ("start", NodeConfig::new(NodeKind::Start).connect("a")),
            ("a", NodeConfig::new(NodeKind::from("boom"))),
        ]);

        assert!(engine.execute_workflow(&wf, None, None).await.is_err());
        assert_eq!(
            broadcaster.types(),
            vec![
                "workflow_started",
                "node_started",
                "node_completed",
                "node_started",
                "node_failed",
                "workflow_failed",
            ]
        );
        let messages = broadcaster.messages.lock().unwrap();
        assert_eq!(messages[4]["node_id"], "a");
        assert_eq!(messages[4]["error"], "boom");
    }

    #[tokio::test]
    async fn python_script_type_runs_the_embedded_interpreter() {
        let engine = engine();
        let wf: WorkflowDefinition = serde_json::from_value(json!({
            "id": "wf",
            "name": "script workflow",
            "nodes": {
                "start": { "type": "start", "connections": ["s"] },
                "s": { "type": "python_script", "config": { "script": "x = 1" } }
            }
        }))
        .unwrap();

        let id = engine.execute_workflow(&wf, None, None).await.unwrap();
        let state = engine.get_workflow_execution_state(&id).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.variables["x"], json!(1));
    }

    #[tokio::test]
    async fn cycles_and_diamonds_visit_each_node_once() {
        let engine = engine();
        let recorder = Arc::new(Recorder::default());
        engine.registry().register("record", recorder.clone());
        let wf = workflow(vec![
            ("start", NodeConfig::new(NodeKind::Start).connect("a").connect("b")),
            ("a", record("c")),
            ("b", record("c")),
            ("c", record("a").connect("ghost")),
        ]);

        engine.execute_workflow(&wf, None, None).await.unwrap();
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn start_nodes_share_one_visited_set() {
        let engine = engine();
        let recorder = Arc::new(Recorder::default());
        engine.registry().register("record", recorder.clone());
        let wf = workflow(vec![
            ("s1", NodeConfig::new(NodeKind::Start).connect("shared")),
            ("s2", NodeConfig::new(NodeKind::Start).connect("shared")),
            ("shared", NodeConfig::new(NodeKind::from("record"))),
        ]);

        engine.execute_workflow(&wf, None, None).await.unwrap();
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["shared"]);
    }

    #[tokio::test]
    async fn missing_start_node_fails() {
        let engine = engine();
        let wf = workflow(vec![("a", NodeConfig::new(NodeKind::End))]);
        let err = engine.execute_workflow(&wf, None, None).await.unwrap_err();
        assert!(matches!(err, EngineError::NoStartNode));
        assert_eq!(err.to_string(), "No start nodes found in workflow");

        let state = engine.state_manager().list_executions().await.remove(0);
        assert_eq!(state.status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_kind_is_reported() {
        let engine = engine();
        let wf = workflow(vec![
            ("start", NodeConfig::new(NodeKind::Start).connect("a")),
            ("a", NodeConfig::new(NodeKind::from("teleport"))),
        ]);
        let err = engine.execute_workflow(&wf, None, None).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownNodeType(ref kind) if kind == "teleport"));
    }

    #[tokio::test]
    async fn config_strings_are_interpolated() {
        let engine = engine();
        let recorder = Arc::new(Recorder::default());
        engine.registry().register("record", recorder.clone());
        let wf = workflow(vec![
            ("start", NodeConfig::new(NodeKind::Start).connect("a")),
            (
                "a",
                NodeConfig::new(NodeKind::from("record")).with_config(json!({
                    "greeting": "Hello ${name}",
                    "count": 3,
                    "nested": ["${n}", "${missing}"],
                })),
            ),
        ]);
        let mut vars = Variables::new();
        vars.insert("name".into(), json!("Ada"));
        vars.insert("n".into(), json!(7));

        let id = engine.execute_workflow(&wf, Some(vars), None).await.unwrap();
        let state = engine.get_workflow_execution_state(&id).await.unwrap();
        let config = &state.node_results["a"]["config"];
        assert_eq!(config["greeting"], "Hello Ada");
        assert_eq!(config["count"], json!(3));
        assert_eq!(config["nested"], json!(["7", "${missing}"]));
    }

    #[tokio::test]
    async fn debugger_pause_applies_variable_writes() {
        let bus = Arc::new(EventBus::new());
        let debugger = Arc::new(WorkflowDebugger::new(Arc::clone(&bus), "data/debug"));
        let engine = Arc::new(
            WorkflowExecutionEngine::new(Arc::clone(&bus), Arc::new(WorkflowStateManager::new()))
                .with_debugger(Arc::clone(&debugger)),
        );
        let recorder = Arc::new(Recorder::default());
        engine.registry().register("record", recorder.clone());
        let wf = workflow(vec![
            ("start", NodeConfig::new(NodeKind::Start).connect("a")),
            (
                "a",
                NodeConfig::new(NodeKind::from("record")).with_config(json!({ "limit": "${limit}" })),
            ),
        ]);

        let execution_id = engine.prepare_execution(&wf, None, None).await;
        let session_id = debugger
            .start_debug_session(
                &execution_id,
                &wf.id,
                vec![Breakpoint::new(BreakpointType::NodeStart).on_node("a")],
            )
            .await
            .unwrap();

        let run = {
            let engine = Arc::clone(&engine);
            let execution_id = execution_id.clone();
            let wf = wf.clone();
            tokio::spawn(async move { engine.run_execution(&execution_id, &wf).await })
        };

        let mut paused = false;
        for _ in 0..200 {
            if debugger.get_session_info(&session_id).await.unwrap().state == DebuggerState::Paused {
                paused = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(paused);
        assert!(recorder.seen.lock().unwrap().is_empty());

        debugger.set_variable_value(&session_id, "limit", json!(5)).await.unwrap();
        debugger.continue_execution(&session_id).await.unwrap();
        run.await.unwrap().unwrap();

        let state = engine.get_workflow_execution_state(&execution_id).await.unwrap();
        assert_eq!(state.variables["limit"], json!(5));
        assert_eq!(state.node_results["a"]["config"]["limit"], "5");
        let stack = debugger.get_call_stack(&session_id).await.unwrap();
        assert_eq!(stack.len(), 1);
        assert_eq!(stack[0].node_id, "a");
    }
}
