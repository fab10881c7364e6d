/// Lock-free node handler registry using ArcSwap
///
/// Maps a node type string to the handler that runs it. Built-in kinds are
/// registered when the engine is built; extension kinds (`NodeKind::Custom`)
/// are only reachable through this map. Registration swaps the whole map
/// pointer so in-flight executions keep the handlers they resolved.

use crate::workflow::types::{NodeKind, Variables};
use anyhow::Result;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

/// Everything a handler sees while running one node
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub execution_id: String,
    pub node_id: String,
    pub kind: NodeKind,
    /// Node config with `${var}` already interpolated
    pub config: Value,
    /// Node config as written in the definition
    pub raw_config: Value,
    /// Working copy of the run's variables; written back after the handler returns
    pub variables: Variables,
}

impl NodeContext {
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.param(key).and_then(|v| v.as_str())
    }

    /// String parameter with a fallback, as most handlers treat missing keys
    pub fn param_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.param_str(key).unwrap_or(default)
    }

    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.param_str(key)
            .ok_or_else(|| anyhow::anyhow!("{} node '{}' missing '{}' parameter", self.kind, self.node_id, key))
    }
}

/// Effect behind a node type
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn execute(&self, ctx: &mut NodeContext) -> Result<Value>;
}

/// Thread-safe handler map with atomic pointer swaps
pub struct NodeHandlerRegistry {
    handlers: ArcSwap<HashMap<String, Arc<dyn NodeHandler>>>,
}

impl std::fmt::Debug for NodeHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl Default for NodeHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeHandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    /// Add or replace the handler for a type string
    pub fn register(&self, kind: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        let kind = kind.into();
        self.handlers.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(kind.clone(), handler.clone());
            next
        });
        tracing::debug!("🧩 Registered node handler: {}", kind);
    }

    pub fn unregister(&self, kind: &str) -> bool {
        let mut removed = false;
        self.handlers.rcu(|current| {
            let mut next = (**current).clone();
            removed = next.remove(kind).is_some();
            next
        });
        removed
    }

    pub fn resolve(&self, kind: &NodeKind) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.load().get(kind.as_str()).cloned()
    }

    /// Registered type strings, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.load().keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo(&'static str);

    #[async_trait]
    impl NodeHandler for Echo {
        async fn execute(&self, ctx: &mut NodeContext) -> Result<Value> {
            ctx.variables.insert("seen".into(), json!(self.0));
            Ok(json!({ "handler": self.0 }))
        }
    }

    fn context(kind: &str) -> NodeContext {
        NodeContext {
            execution_id: "exec".into(),
            node_id: "n1".into(),
            kind: kind.into(),
            config: json!({}),
            raw_config: json!({}),
            variables: Variables::new(),
        }
    }

    #[tokio::test]
    async fn custom_kinds_resolve_through_registry() {
        let registry = NodeHandlerRegistry::new();
        let kind = NodeKind::from("slack_notify");
        assert!(registry.resolve(&kind).is_none());

        registry.register("slack_notify", Arc::new(Echo("slack")));
        let handler = registry.resolve(&kind).unwrap();
        let mut ctx = context("slack_notify");
        let result = handler.execute(&mut ctx).await.unwrap();
        assert_eq!(result["handler"], "slack");
        assert_eq!(ctx.variables["seen"], "slack");

        assert!(registry.unregister("slack_notify"));
        assert!(!registry.unregister("slack_notify"));
        assert!(registry.resolve(&kind).is_none());
    }

    #[tokio::test]
    async fn later_registration_overrides() {
        let registry = NodeHandlerRegistry::new();
        registry.register("log", Arc::new(Echo("first")));
        registry.register("log", Arc::new(Echo("second")));

        let handler = registry.resolve(&NodeKind::Log).unwrap();
        let result = handler.execute(&mut context("log")).await.unwrap();
        assert_eq!(result["handler"], "second");
        assert_eq!(registry.kinds(), vec!["log".to_string()]);
    }

    #[test]
    fn missing_required_param_names_the_node() {
        let ctx = context("file_write");
        let err = ctx.require_str("file_path").unwrap_err().to_string();
        assert!(err.contains("file_write node 'n1'"));
        assert_eq!(ctx.param_or("mode", "w"), "w");
    }
}
