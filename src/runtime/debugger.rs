/// Interactive workflow debugger
///
/// A debug session is attached to one execution. The engine calls
/// `check_breakpoints` at each node boundary; when a breakpoint (or an armed
/// step) fires, the call parks the engine's task on a per-session
/// `watch` channel until a client calls `continue_execution`,
/// `step_execution` or `stop_debug_session`. Other executions keep running.
///
/// Every debugger action is published on the event bus as
/// `workflow.debug_event`.

use crate::error::DebuggerError;
use crate::runtime::events::EventBus;
use crate::runtime::expression::{lookup_path, Condition};
use crate::workflow::types::Variables;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};

/// Where in a node's lifecycle a breakpoint check happens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointType {
    NodeStart,
    NodeEnd,
    NodeError,
    /// Fires whenever its condition holds, checked at node start
    Condition,
    VariableChange,
}

impl BreakpointType {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakpointType::NodeStart => "node_start",
            BreakpointType::NodeEnd => "node_end",
            BreakpointType::NodeError => "node_error",
            BreakpointType::Condition => "condition",
            BreakpointType::VariableChange => "variable_change",
        }
    }

    fn fires_at(self, check: BreakpointType) -> bool {
        self == check || (self == BreakpointType::Condition && check == BreakpointType::NodeStart)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebuggerState {
    Idle,
    Running,
    Paused,
    Stepped,
    Stopped,
}

/// Parsed `hit_condition`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HitCondition {
    AtLeast(u64),
    Exactly(u64),
    Every(u64),
}

impl HitCondition {
    fn parse(raw: &str) -> Result<Self, DebuggerError> {
        let raw = raw.trim();
        let invalid = || DebuggerError::InvalidHitCondition(raw.to_string());
        let number = |s: &str| s.trim().parse::<u64>().map_err(|_| invalid());

        if let Some(n) = raw.strip_prefix(">=") {
            Ok(HitCondition::AtLeast(number(n)?))
        } else if let Some(n) = raw.strip_prefix("==") {
            Ok(HitCondition::Exactly(number(n)?))
        } else if let Some(n) = raw.strip_prefix('%') {
            match number(n)? {
                0 => Err(invalid()),
                n => Ok(HitCondition::Every(n)),
            }
        } else {
            Err(invalid())
        }
    }

    fn holds(self, hit_count: u64) -> bool {
        match self {
            HitCondition::AtLeast(n) => hit_count >= n,
            HitCondition::Exactly(n) => hit_count == n,
            HitCondition::Every(n) => hit_count % n == 0,
        }
    }
}

/// Debugging breakpoint definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub breakpoint_type: BreakpointType,
    /// None matches every node
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub variable_name: Option<String>,
    /// `>=N`, `==N` or `%N`
    #[serde(default)]
    pub hit_condition: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub hit_count: u64,
}

fn enabled_by_default() -> bool {
    true
}

impl Breakpoint {
    pub fn new(breakpoint_type: BreakpointType) -> Self {
        Self {
            breakpoint_type,
            node_id: None,
            condition: None,
            variable_name: None,
            hit_condition: None,
            enabled: true,
            hit_count: 0,
        }
    }

    pub fn on_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn watching(mut self, variable_name: impl Into<String>) -> Self {
        self.variable_name = Some(variable_name.into());
        self
    }

    pub fn hit(mut self, hit_condition: impl Into<String>) -> Self {
        self.hit_condition = Some(hit_condition.into());
        self
    }

    fn validate(&self) -> Result<(), DebuggerError> {
        if let Some(raw) = &self.hit_condition {
            HitCondition::parse(raw)?;
        }
        if let Some(condition) = &self.condition {
            Condition::parse(condition)?;
        }
        Ok(())
    }

    /// Type, node, condition and changed-variable filters, before hit counting
    fn matches(&self, check: BreakpointType, node_id: &str, mirror: &Variables, delta: &Variables) -> bool {
        if !self.breakpoint_type.fires_at(check) {
            return false;
        }
        if self.node_id.as_deref().is_some_and(|id| id != node_id) {
            return false;
        }
        if self.breakpoint_type == BreakpointType::VariableChange {
            if let Some(name) = &self.variable_name {
                if !delta.contains_key(name) {
                    return false;
                }
            }
        }
        match &self.condition {
            Some(condition) => Condition::parse(condition)
                .map(|c| c.evaluate(mirror))
                .unwrap_or(false),
            None => true,
        }
    }

    fn hit_condition_met(&self) -> bool {
        match &self.hit_condition {
            Some(raw) => HitCondition::parse(raw)
                .map(|h| h.holds(self.hit_count))
                .unwrap_or(true),
            None => true,
        }
    }
}

/// Identity of the node a check is made for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSite {
    pub node_id: String,
    pub node_name: String,
    pub node_type: String,
}

impl NodeSite {
    pub fn new(node_id: &str, node_name: &str, node_type: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            node_name: node_name.to_string(),
            node_type: node_type.to_string(),
        }
    }
}

/// Snapshot appended each time the session pauses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    pub node_id: String,
    pub node_name: String,
    pub node_type: String,
    pub variables: Variables,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchExpression {
    pub name: String,
    pub expression: String,
}

/// Result of evaluating one watch; exactly one of `value`/`error` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchResult {
    pub name: String,
    pub expression: String,
    pub value: Option<Value>,
    pub error: Option<String>,
}

/// Timing sample for one node run under a debug session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub node_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: f64,
    #[serde(default)]
    pub metrics: Value,
}

/// Debug session state, owned by the debugger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugSession {
    pub session_id: String,
    pub execution_id: String,
    pub workflow_id: String,
    pub state: DebuggerState,
    pub current_node_id: Option<String>,
    /// Mirror of the execution's variables as of the last check
    pub variables: Variables,
    pub watch_expressions: BTreeMap<String, WatchExpression>,
    pub breakpoints: BTreeMap<String, Breakpoint>,
    pub stack_frames: Vec<StackFrame>,
    pub started_at: DateTime<Utc>,
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    step_armed: bool,
    /// Writes made through `set_variable_value`, not yet applied to the execution
    #[serde(skip)]
    pending_writes: Variables,
    #[serde(skip)]
    performance: Vec<PerformanceSample>,
}

/// Envelope published as `workflow.debug_event`
#[derive(Debug, Clone, Serialize)]
pub struct DebugEvent {
    pub event_id: String,
    pub session_id: String,
    pub event_type: String,
    pub node_id: Option<String>,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

struct SessionSlot {
    session: Mutex<DebugSession>,
    /// Rendezvous for a paused engine task
    state_tx: watch::Sender<DebuggerState>,
}

/// Session registry and breakpoint controller
pub struct WorkflowDebugger {
    event_bus: Arc<EventBus>,
    data_dir: PathBuf,
    sessions: RwLock<HashMap<String, Arc<SessionSlot>>>,
}

impl std::fmt::Debug for WorkflowDebugger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDebugger")
            .field("data_dir", &self.data_dir)
            .finish()
    }
}

type DebugResult<T> = Result<T, DebuggerError>;

impl WorkflowDebugger {
    pub fn new(event_bus: Arc<EventBus>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            event_bus,
            data_dir: data_dir.into(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    async fn slot(&self, session_id: &str) -> DebugResult<Arc<SessionSlot>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| DebuggerError::SessionNotFound(session_id.to_string()))
    }

    async fn emit(&self, session_id: &str, event_type: &str, node_id: Option<String>, data: Value) {
        let event = DebugEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            event_type: event_type.to_string(),
            node_id,
            data,
            timestamp: Utc::now(),
        };
        self.event_bus
            .emit("workflow.debug_event", json!({ "event": event }))
            .await;
    }

    pub async fn start_debug_session(
        &self,
        execution_id: &str,
        workflow_id: &str,
        initial_breakpoints: Vec<Breakpoint>,
    ) -> DebugResult<String> {
        let mut breakpoints = BTreeMap::new();
        for breakpoint in initial_breakpoints {
            breakpoint.validate()?;
            breakpoints.insert(uuid::Uuid::new_v4().to_string(), breakpoint);
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let session = DebugSession {
            session_id: session_id.clone(),
            execution_id: execution_id.to_string(),
            workflow_id: workflow_id.to_string(),
            state: DebuggerState::Running,
            current_node_id: None,
            variables: Variables::new(),
            watch_expressions: BTreeMap::new(),
            breakpoints,
            stack_frames: Vec::new(),
            started_at: Utc::now(),
            paused_at: None,
            step_armed: false,
            pending_writes: Variables::new(),
            performance: Vec::new(),
        };
        let (state_tx, _) = watch::channel(DebuggerState::Running);
        self.sessions.write().await.insert(
            session_id.clone(),
            Arc::new(SessionSlot {
                session: Mutex::new(session),
                state_tx,
            }),
        );

        tracing::info!("🐞 Debug session {} attached to execution {}", session_id, execution_id);
        self.emit(
            &session_id,
            "session_started",
            None,
            json!({ "execution_id": execution_id, "workflow_id": workflow_id }),
        )
        .await;
        Ok(session_id)
    }

    /// Terminate a session, releasing an engine task parked on it
    pub async fn stop_debug_session(&self, session_id: &str) -> DebugResult<()> {
        let slot = self
            .sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| DebuggerError::SessionNotFound(session_id.to_string()))?;
        slot.session.lock().await.state = DebuggerState::Stopped;
        slot.state_tx.send_replace(DebuggerState::Stopped);

        tracing::info!("🛑 Debug session {} stopped", session_id);
        self.emit(session_id, "session_stopped", None, json!({})).await;
        Ok(())
    }

    pub async fn get_session_info(&self, session_id: &str) -> DebugResult<DebugSession> {
        let slot = self.slot(session_id).await?;
        let session = slot.session.lock().await;
        Ok(session.clone())
    }

    /// Session attached to an execution, if any
    pub async fn session_for_execution(&self, execution_id: &str) -> Option<String> {
        let slots: Vec<Arc<SessionSlot>> = self.sessions.read().await.values().cloned().collect();
        for slot in slots {
            let session = slot.session.lock().await;
            if session.execution_id == execution_id {
                return Some(session.session_id.clone());
            }
        }
        None
    }

    pub async fn list_sessions(&self) -> Vec<DebugSession> {
        let slots: Vec<Arc<SessionSlot>> = self.sessions.read().await.values().cloned().collect();
        let mut sessions = Vec::with_capacity(slots.len());
        for slot in slots {
            sessions.push(slot.session.lock().await.clone());
        }
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        sessions
    }

    pub async fn set_breakpoint(&self, session_id: &str, breakpoint: Breakpoint) -> DebugResult<String> {
        breakpoint.validate()?;
        let slot = self.slot(session_id).await?;
        let breakpoint_id = uuid::Uuid::new_v4().to_string();
        slot.session
            .lock()
            .await
            .breakpoints
            .insert(breakpoint_id.clone(), breakpoint.clone());

        self.emit(
            session_id,
            "breakpoint_set",
            breakpoint.node_id.clone(),
            json!({ "breakpoint_id": breakpoint_id, "breakpoint": breakpoint }),
        )
        .await;
        Ok(breakpoint_id)
    }

    pub async fn remove_breakpoint(&self, session_id: &str, breakpoint_id: &str) -> DebugResult<()> {
        let slot = self.slot(session_id).await?;
        let removed = slot
            .session
            .lock()
            .await
            .breakpoints
            .remove(breakpoint_id)
            .ok_or_else(|| DebuggerError::BreakpointNotFound(breakpoint_id.to_string()))?;

        self.emit(
            session_id,
            "breakpoint_removed",
            removed.node_id,
            json!({ "breakpoint_id": breakpoint_id }),
        )
        .await;
        Ok(())
    }

    /// Flip `enabled`; returns the new value
    pub async fn toggle_breakpoint(&self, session_id: &str, breakpoint_id: &str) -> DebugResult<bool> {
        let slot = self.slot(session_id).await?;
        let (node_id, enabled) = {
            let mut session = slot.session.lock().await;
            let breakpoint = session
                .breakpoints
                .get_mut(breakpoint_id)
                .ok_or_else(|| DebuggerError::BreakpointNotFound(breakpoint_id.to_string()))?;
            breakpoint.enabled = !breakpoint.enabled;
            (breakpoint.node_id.clone(), breakpoint.enabled)
        };

        self.emit(
            session_id,
            "breakpoint_toggled",
            node_id,
            json!({ "breakpoint_id": breakpoint_id, "enabled": enabled }),
        )
        .await;
        Ok(enabled)
    }

    /// Evaluate breakpoints for one check and block while paused
    ///
    /// `variables` is merged into the session mirror; for `VariableChange`
    /// checks it is the delta of changed names. Returns whether the session
    /// paused. Unknown or stopped sessions never pause.
    pub async fn check_breakpoints(
        &self,
        session_id: &str,
        site: &NodeSite,
        breakpoint_type: BreakpointType,
        variables: &Variables,
        error_info: Option<Value>,
    ) -> bool {
        let Ok(slot) = self.slot(session_id).await else {
            return false;
        };

        let (hit, mut state_rx) = {
            let mut session = slot.session.lock().await;
            if session.state == DebuggerState::Stopped {
                return false;
            }
            for (name, value) in variables {
                session.variables.insert(name.clone(), value.clone());
            }
            session.current_node_id = Some(site.node_id.clone());

            let mut hit = None;
            if std::mem::take(&mut session.step_armed) {
                hit = Some(json!({ "reason": "step", "breakpoint_id": null, "breakpoint": null }));
            } else {
                let mirror = session.variables.clone();
                for (breakpoint_id, breakpoint) in session.breakpoints.iter_mut() {
                    if !breakpoint.enabled || !breakpoint.matches(breakpoint_type, &site.node_id, &mirror, variables) {
                        continue;
                    }
                    breakpoint.hit_count += 1;
                    if !breakpoint.hit_condition_met() {
                        continue;
                    }
                    hit = Some(json!({
                        "reason": "breakpoint",
                        "breakpoint_id": breakpoint_id,
                        "breakpoint": breakpoint,
                    }));
                    break;
                }
            }
            let Some(hit) = hit else {
                return false;
            };

            let now = Utc::now();
            session.state = DebuggerState::Paused;
            session.paused_at = Some(now);
            let frame = StackFrame {
                node_id: site.node_id.clone(),
                node_name: site.node_name.clone(),
                node_type: site.node_type.clone(),
                variables: session.variables.clone(),
                timestamp: now,
            };
            session.stack_frames.push(frame);
            slot.state_tx.send_replace(DebuggerState::Paused);
            (hit, slot.state_tx.subscribe())
        };

        let mut data = hit;
        data["check"] = json!(breakpoint_type.as_str());
        data["variables"] = json!(variables);
        data["error_info"] = error_info.unwrap_or(Value::Null);
        tracing::info!("⏸️ Execution paused at node '{}' ({})", site.node_id, breakpoint_type.as_str());
        self.emit(session_id, "breakpoint_hit", Some(site.node_id.clone()), data).await;

        // A dropped sender means the session was removed, which also releases the engine
        let _ = state_rx.wait_for(|state| *state != DebuggerState::Paused).await;
        tracing::info!("▶️ Execution resumed at node '{}'", site.node_id);
        true
    }

    pub async fn continue_execution(&self, session_id: &str) -> DebugResult<()> {
        let slot = self.slot(session_id).await?;
        let node_id = {
            let mut session = slot.session.lock().await;
            session.state = DebuggerState::Running;
            session.paused_at = None;
            session.current_node_id.clone()
        };
        slot.state_tx.send_replace(DebuggerState::Running);

        self.emit(session_id, "execution_continued", node_id, json!({})).await;
        Ok(())
    }

    /// Resume and pause again at the very next check
    ///
    /// The session reports `stepped` until that check pauses it again, or
    /// for good if the run ends first.
    pub async fn step_execution(&self, session_id: &str, step_type: &str) -> DebugResult<()> {
        let slot = self.slot(session_id).await?;
        let node_id = {
            let mut session = slot.session.lock().await;
            session.state = DebuggerState::Stepped;
            session.paused_at = None;
            // Armed before the paused task is released
            session.step_armed = true;
            session.current_node_id.clone()
        };
        slot.state_tx.send_replace(DebuggerState::Stepped);
        self.emit(session_id, "execution_stepped", node_id, json!({ "step_type": step_type }))
            .await;
        Ok(())
    }

    pub async fn add_watch_expression(
        &self,
        session_id: &str,
        expression: &str,
        name: Option<&str>,
    ) -> DebugResult<String> {
        let slot = self.slot(session_id).await?;
        let watch_id = uuid::Uuid::new_v4().to_string();
        let watch = {
            let mut session = slot.session.lock().await;
            let watch = WatchExpression {
                name: name
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("watch_{}", session.watch_expressions.len() + 1)),
                expression: expression.to_string(),
            };
            session.watch_expressions.insert(watch_id.clone(), watch.clone());
            watch
        };

        self.emit(
            session_id,
            "watch_added",
            None,
            json!({ "watch_id": watch_id, "expression": watch.expression, "name": watch.name }),
        )
        .await;
        Ok(watch_id)
    }

    pub async fn remove_watch_expression(&self, session_id: &str, watch_id: &str) -> DebugResult<()> {
        let slot = self.slot(session_id).await?;
        slot.session
            .lock()
            .await
            .watch_expressions
            .remove(watch_id)
            .ok_or_else(|| DebuggerError::WatchNotFound(watch_id.to_string()))?;
        self.emit(session_id, "watch_removed", None, json!({ "watch_id": watch_id }))
            .await;
        Ok(())
    }

    /// Evaluate every watch against `variables`, or the session mirror when None
    pub async fn evaluate_watch_expressions(
        &self,
        session_id: &str,
        variables: Option<&Variables>,
    ) -> DebugResult<BTreeMap<String, WatchResult>> {
        let slot = self.slot(session_id).await?;
        let session = slot.session.lock().await;
        let scope = variables.unwrap_or(&session.variables);

        Ok(session
            .watch_expressions
            .iter()
            .map(|(watch_id, watch)| {
                let path = watch.expression.trim();
                let (value, error) = if path.is_empty() {
                    (None, Some("Empty watch expression".to_string()))
                } else {
                    match lookup_path(scope, path) {
                        Some(value) => (Some(value.clone()), None),
                        None => (None, Some(DebuggerError::VariableNotFound(path.to_string()).to_string())),
                    }
                };
                let result = WatchResult {
                    name: watch.name.clone(),
                    expression: watch.expression.clone(),
                    value,
                    error,
                };
                (watch_id.clone(), result)
            })
            .collect())
    }

    pub async fn get_variable_value(&self, session_id: &str, variable_path: &str) -> DebugResult<Value> {
        let slot = self.slot(session_id).await?;
        let session = slot.session.lock().await;
        lookup_path(&session.variables, variable_path)
            .cloned()
            .ok_or_else(|| DebuggerError::VariableNotFound(variable_path.to_string()))
    }

    /// Write a top-level variable; the engine applies it when the paused node resumes
    pub async fn set_variable_value(&self, session_id: &str, variable_path: &str, new_value: Value) -> DebugResult<()> {
        if variable_path.contains('.') {
            return Err(DebuggerError::NestedVariableWrite(variable_path.to_string()));
        }
        let slot = self.slot(session_id).await?;
        {
            let mut session = slot.session.lock().await;
            session.variables.insert(variable_path.to_string(), new_value.clone());
            session.pending_writes.insert(variable_path.to_string(), new_value.clone());
        }

        self.emit(
            session_id,
            "variable_changed",
            None,
            json!({ "variable_path": variable_path, "new_value": new_value }),
        )
        .await;
        Ok(())
    }

    /// Drain variable writes made while paused
    pub async fn take_pending_writes(&self, session_id: &str) -> Variables {
        match self.slot(session_id).await {
            Ok(slot) => std::mem::take(&mut slot.session.lock().await.pending_writes),
            Err(_) => Variables::new(),
        }
    }

    pub async fn get_call_stack(&self, session_id: &str) -> DebugResult<Vec<StackFrame>> {
        let slot = self.slot(session_id).await?;
        let frames = slot.session.lock().await.stack_frames.clone();
        Ok(frames)
    }

    pub async fn capture_performance_data(
        &self,
        session_id: &str,
        node_id: &str,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        metrics: Value,
    ) -> DebugResult<()> {
        let slot = self.slot(session_id).await?;
        let sample = PerformanceSample {
            node_id: node_id.to_string(),
            started_at,
            ended_at,
            duration_ms: (ended_at - started_at).num_microseconds().unwrap_or(0) as f64 / 1000.0,
            metrics,
        };
        slot.session.lock().await.performance.push(sample.clone());

        self.emit(
            session_id,
            "performance_captured",
            Some(node_id.to_string()),
            json!(sample),
        )
        .await;
        Ok(())
    }

    /// Write the whole session to `debug_export_<session>_<unix>.json`
    pub async fn export_debug_data(&self, session_id: &str) -> DebugResult<PathBuf> {
        let slot = self.slot(session_id).await?;
        let export = {
            let session = slot.session.lock().await;
            json!({
                "session": {
                    "session_id": session.session_id,
                    "execution_id": session.execution_id,
                    "workflow_id": session.workflow_id,
                    "state": session.state,
                    "started_at": session.started_at,
                    "ended_at": Utc::now(),
                },
                "breakpoints": session.breakpoints,
                "stack_frames": session.stack_frames,
                "variables": session.variables,
                "watch_expressions": session.watch_expressions,
                "performance_data": session.performance,
            })
        };

        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| DebuggerError::Export(e.to_string()))?;
        let path = self
            .data_dir
            .join(format!("debug_export_{}_{}.json", session_id, Utc::now().timestamp()));
        let body = serde_json::to_vec_pretty(&export).map_err(|e| DebuggerError::Export(e.to_string()))?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| DebuggerError::Export(e.to_string()))?;

        tracing::info!("📦 Exported debug session {} to {}", session_id, path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn debugger() -> Arc<WorkflowDebugger> {
        Arc::new(WorkflowDebugger::new(Arc::new(EventBus::new()), "data/debug"))
    }

    fn vars(value: Value) -> Variables {
        value.as_object().cloned().unwrap()
    }

    fn site(node_id: &str) -> NodeSite {
        NodeSite::new(node_id, node_id, "log")
    }

    /// Wait until the session reports `Paused`
    async fn wait_paused(debugger: &WorkflowDebugger, session_id: &str) {
        for _ in 0..200 {
            if debugger.get_session_info(session_id).await.unwrap().state == DebuggerState::Paused {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session never paused");
    }

    #[test]
    fn hit_conditions() {
        assert_eq!(HitCondition::parse(">=3").unwrap(), HitCondition::AtLeast(3));
        assert_eq!(HitCondition::parse("== 2").unwrap(), HitCondition::Exactly(2));
        assert_eq!(HitCondition::parse("%2").unwrap(), HitCondition::Every(2));
        assert!(HitCondition::parse("%0").is_err());
        assert!(HitCondition::parse("sometimes").is_err());
        assert!(HitCondition::Every(2).holds(4));
        assert!(!HitCondition::Every(2).holds(3));
    }

    #[tokio::test]
    async fn invalid_breakpoints_are_rejected() {
        let debugger = debugger();
        let session_id = debugger.start_debug_session("exec", "wf", vec![]).await.unwrap();

        let err = debugger
            .set_breakpoint(&session_id, Breakpoint::new(BreakpointType::NodeStart).hit("x5"))
            .await
            .unwrap_err();
        assert!(matches!(err, DebuggerError::InvalidHitCondition(_)));

        let err = debugger
            .set_breakpoint(&session_id, Breakpoint::new(BreakpointType::Condition).when("${a} =="))
            .await
            .unwrap_err();
        assert!(matches!(err, DebuggerError::InvalidCondition(_)));

        let err = debugger
            .set_breakpoint("missing", Breakpoint::new(BreakpointType::NodeStart))
            .await
            .unwrap_err();
        assert!(matches!(err, DebuggerError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn modulo_hit_condition_pauses_on_even_hits_only() {
        let debugger = debugger();
        let session_id = debugger
            .start_debug_session(
                "exec",
                "wf",
                vec![Breakpoint::new(BreakpointType::NodeStart).on_node("a").hit("%2")],
            )
            .await
            .unwrap();

        for hit in 1..=4u64 {
            let task = {
                let debugger = Arc::clone(&debugger);
                let session_id = session_id.clone();
                tokio::spawn(async move {
                    debugger
                        .check_breakpoints(&session_id, &site("a"), BreakpointType::NodeStart, &Variables::new(), None)
                        .await
                })
            };
            if hit % 2 == 0 {
                wait_paused(&debugger, &session_id).await;
                debugger.continue_execution(&session_id).await.unwrap();
                assert!(task.await.unwrap());
            } else {
                assert!(!task.await.unwrap());
            }
        }

        let session = debugger.get_session_info(&session_id).await.unwrap();
        let breakpoint = session.breakpoints.values().next().unwrap();
        assert_eq!(breakpoint.hit_count, 4);
        assert_eq!(session.stack_frames.len(), 2);
    }

    #[tokio::test]
    async fn continue_clears_paused_at() {
        let debugger = debugger();
        let session_id = debugger
            .start_debug_session("exec", "wf", vec![Breakpoint::new(BreakpointType::NodeEnd)])
            .await
            .unwrap();

        let task = {
            let debugger = Arc::clone(&debugger);
            let session_id = session_id.clone();
            tokio::spawn(async move {
                debugger
                    .check_breakpoints(&session_id, &site("b"), BreakpointType::NodeEnd, &vars(json!({ "x": 1 })), None)
                    .await
            })
        };
        wait_paused(&debugger, &session_id).await;
        let paused = debugger.get_session_info(&session_id).await.unwrap();
        assert!(paused.paused_at.is_some());
        assert_eq!(paused.current_node_id.as_deref(), Some("b"));

        debugger.continue_execution(&session_id).await.unwrap();
        assert!(task.await.unwrap());
        let resumed = debugger.get_session_info(&session_id).await.unwrap();
        assert_eq!(resumed.state, DebuggerState::Running);
        assert!(resumed.paused_at.is_none());
        assert_eq!(resumed.stack_frames[0].variables["x"], json!(1));
    }

    #[tokio::test]
    async fn step_pauses_at_next_check_without_breakpoints() {
        let debugger = debugger();
        let session_id = debugger
            .start_debug_session("exec", "wf", vec![Breakpoint::new(BreakpointType::NodeStart).on_node("a")])
            .await
            .unwrap();

        let first = {
            let debugger = Arc::clone(&debugger);
            let session_id = session_id.clone();
            tokio::spawn(async move {
                debugger
                    .check_breakpoints(&session_id, &site("a"), BreakpointType::NodeStart, &Variables::new(), None)
                    .await
            })
        };
        wait_paused(&debugger, &session_id).await;
        debugger.step_execution(&session_id, "into").await.unwrap();
        assert!(first.await.unwrap());
        let info = debugger.get_session_info(&session_id).await.unwrap();
        assert_eq!(info.state, DebuggerState::Stepped);
        assert!(info.paused_at.is_none());

        let second = {
            let debugger = Arc::clone(&debugger);
            let session_id = session_id.clone();
            tokio::spawn(async move {
                debugger
                    .check_breakpoints(&session_id, &site("b"), BreakpointType::NodeEnd, &Variables::new(), None)
                    .await
            })
        };
        wait_paused(&debugger, &session_id).await;
        debugger.stop_debug_session(&session_id).await.unwrap();
        assert!(second.await.unwrap());
    }

    #[tokio::test]
    async fn variable_change_requires_name_in_delta() {
        let debugger = debugger();
        let session_id = debugger
            .start_debug_session(
                "exec",
                "wf",
                vec![Breakpoint::new(BreakpointType::VariableChange).watching("total").hit(">=100")],
            )
            .await
            .unwrap();

        let delta = vars(json!({ "other": 1 }));
        assert!(!debugger
            .check_breakpoints(&session_id, &site("a"), BreakpointType::VariableChange, &delta, None)
            .await);
        let delta = vars(json!({ "total": 1 }));
        assert!(!debugger
            .check_breakpoints(&session_id, &site("a"), BreakpointType::VariableChange, &delta, None)
            .await);

        let session = debugger.get_session_info(&session_id).await.unwrap();
        assert_eq!(session.breakpoints.values().next().unwrap().hit_count, 1);
        assert_eq!(session.variables, vars(json!({ "other": 1, "total": 1 })));
    }

    #[tokio::test]
    async fn watch_expressions_report_errors_per_watch() {
        let debugger = debugger();
        let session_id = debugger.start_debug_session("exec", "wf", vec![]).await.unwrap();
        let ok = debugger
            .add_watch_expression(&session_id, "user.name", Some("who"))
            .await
            .unwrap();
        let missing = debugger.add_watch_expression(&session_id, "user.age", None).await.unwrap();

        let scope = vars(json!({ "user": { "name": "ada" } }));
        let results = debugger
            .evaluate_watch_expressions(&session_id, Some(&scope))
            .await
            .unwrap();
        assert_eq!(results[&ok].value, Some(json!("ada")));
        assert_eq!(results[&ok].name, "who");
        assert!(results[&missing].value.is_none());
        assert!(results[&missing].error.as_deref().unwrap().contains("user.age"));
        assert_eq!(results[&missing].name, "watch_2");

        debugger.remove_watch_expression(&session_id, &ok).await.unwrap();
        let err = debugger.remove_watch_expression(&session_id, &ok).await.unwrap_err();
        assert!(matches!(err, DebuggerError::WatchNotFound(_)));
    }

    #[tokio::test]
    async fn nested_variable_write_fails_loudly() {
        let debugger = debugger();
        let session_id = debugger.start_debug_session("exec", "wf", vec![]).await.unwrap();

        let err = debugger
            .set_variable_value(&session_id, "user.name", json!("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, DebuggerError::NestedVariableWrite(_)));

        debugger.set_variable_value(&session_id, "limit", json!(5)).await.unwrap();
        assert_eq!(debugger.get_variable_value(&session_id, "limit").await.unwrap(), json!(5));
        assert!(matches!(
            debugger.get_variable_value(&session_id, "nope").await.unwrap_err(),
            DebuggerError::VariableNotFound(_)
        ));
        assert_eq!(debugger.take_pending_writes(&session_id).await, vars(json!({ "limit": 5 })));
        assert!(debugger.take_pending_writes(&session_id).await.is_empty());
    }

    #[tokio::test]
    async fn breakpoint_management_and_export() {
        let dir = tempfile::tempdir().unwrap();
        let debugger = WorkflowDebugger::new(Arc::new(EventBus::new()), dir.path());
        let session_id = debugger.start_debug_session("exec", "wf", vec![]).await.unwrap();

        let bp = debugger
            .set_breakpoint(&session_id, Breakpoint::new(BreakpointType::NodeError))
            .await
            .unwrap();
        assert!(!debugger.toggle_breakpoint(&session_id, &bp).await.unwrap());
        assert!(matches!(
            debugger.toggle_breakpoint(&session_id, "nope").await.unwrap_err(),
            DebuggerError::BreakpointNotFound(_)
        ));

        let now = Utc::now();
        debugger
            .capture_performance_data(&session_id, "a", now, now + chrono::Duration::milliseconds(25), json!({}))
            .await
            .unwrap();

        let path = debugger.export_debug_data(&session_id).await.unwrap();
        let exported: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(exported["session"]["execution_id"], "exec");
        assert_eq!(exported["performance_data"][0]["duration_ms"], json!(25.0));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(&format!("debug_export_{}_", session_id)));

        debugger.remove_breakpoint(&session_id, &bp).await.unwrap();
        assert_eq!(debugger.session_for_execution("exec").await, Some(session_id.clone()));
        debugger.stop_debug_session(&session_id).await.unwrap();
        assert!(debugger.session_for_execution("exec").await.is_none());
    }
}
