// SPDX-License-Identifier: MIT

//! Node executor capability and registry
//!
//! The engine never branches on node type names beyond the trigger set
//! and condition special-casing that are intrinsic to scheduling; every
//! other behavior lives behind a `NodeExecutor` registered for a type tag.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::EngineError;
use crate::graph::WorkflowNode;
use crate::run::{ExecutionMode, NodeRun};

/// Everything an executor gets to see for one node invocation
pub struct ExecutionContext<'a> {
    pub run_id: &'a str,
    pub node: &'a WorkflowNode,
    /// Node-run rows recorded so far in this run (upstream outputs live
    /// in here)
    pub prior_node_runs: &'a [NodeRun],
    pub execution_mode: ExecutionMode,
    /// Owner of the workflow, for credential scoping in integrations
    pub user_id: Option<&'a str>,
    /// Position of this invocation in the run's execution order
    pub node_index: usize,
}

/// Trait for node executors invoked by the scheduler.
///
/// Implementations perform the actual integration work (HTTP calls, AI
/// providers, utilities). An `Err` is caught per node and recorded as a
/// failed node run; it never aborts the rest of the batch.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, ctx: ExecutionContext<'_>) -> Result<Value, EngineError>;
}

/// Node-type tag to executor mapping, resolved once at startup
#[derive(Clone)]
pub struct ExecutorRegistry {
    executors: Arc<RwLock<HashMap<String, Arc<dyn NodeExecutor>>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, node_type: impl Into<String>, executor: Arc<dyn NodeExecutor>) {
        let mut executors = self.executors.write().await;
        executors.insert(node_type.into(), executor);
    }

    pub async fn get(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
        let executors = self.executors.read().await;
        executors.get(node_type).cloned()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct MockExecutor {
        response: Value,
    }

    #[async_trait]
    impl NodeExecutor for MockExecutor {
        async fn execute(&self, _ctx: ExecutionContext<'_>) -> Result<Value, EngineError> {
            Ok(self.response.clone())
        }
    }

    fn make_node(id: &str, node_type: &str) -> WorkflowNode {
        serde_json::from_value(json!({"id": id, "type": node_type, "data": {}})).unwrap()
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = ExecutorRegistry::new();
        registry
            .register("agent", Arc::new(MockExecutor { response: json!(1) }))
            .await;

        assert!(registry.get("agent").await.is_some());
        assert!(registry.get("slack").await.is_none());
    }

    #[tokio::test]
    async fn test_registry_is_clone() {
        let registry = ExecutorRegistry::new();
        let cloned = registry.clone();
        cloned
            .register("agent", Arc::new(MockExecutor { response: json!(1) }))
            .await;

        // Both handles see the same mapping
        assert!(registry.get("agent").await.is_some());
    }

    #[tokio::test]
    async fn test_execute_through_registry() {
        let registry = ExecutorRegistry::new();
        registry
            .register(
                "agent",
                Arc::new(MockExecutor {
                    response: json!({"ok": true}),
                }),
            )
            .await;

        let node = make_node("a", "agent");
        let executor = registry.get("agent").await.unwrap();
        let output = executor
            .execute(ExecutionContext {
                run_id: "run-1",
                node: &node,
                prior_node_runs: &[],
                execution_mode: ExecutionMode::Legacy,
                user_id: None,
                node_index: 0,
            })
            .await
            .unwrap();
        assert_eq!(output, json!({"ok": true}));
    }
}
