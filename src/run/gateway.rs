// SPDX-License-Identifier: MIT

//! Run State Gateway - the engine's only window into persisted history
//!
//! The engine never writes run or node-run rows directly; everything goes
//! through this capability so resume semantics stay correct no matter
//! which store backs it. `MemoryGateway` is the reference implementation
//! used by the CLI harness and the test suite.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::types::{NodeRun, RunStatus, WorkflowRun};
use crate::error::EngineError;

/// Raw persisted graph payload (nodes/edges as stored JSON)
#[derive(Debug, Clone)]
pub struct StoredGraph {
    pub nodes: Value,
    pub edges: Value,
}

/// Load/save capability over persisted run state
#[async_trait]
pub trait RunStateGateway: Send + Sync {
    /// Load the run record
    async fn load_run(&self, run_id: &str) -> Result<WorkflowRun, EngineError>;

    /// Load the workflow graph the run executes against
    async fn load_graph(&self, run_id: &str) -> Result<StoredGraph, EngineError>;

    /// All node-run rows recorded for this run so far
    async fn node_runs(&self, run_id: &str) -> Result<Vec<NodeRun>, EngineError>;

    /// Upsert a node-run row, keyed by (run, node). A second save for the
    /// same node replaces the row's mutable fields but keeps its identity,
    /// which is what makes resume-after-crash safe.
    async fn save_node_run(&self, run_id: &str, record: NodeRun) -> Result<(), EngineError>;

    /// Finalize the run's status, recording an error payload if any
    async fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<Value>,
    ) -> Result<(), EngineError>;
}

#[derive(Default)]
struct MemoryState {
    runs: HashMap<String, WorkflowRun>,
    graphs: HashMap<String, StoredGraph>,
    // run id -> node id -> row; at most one row per (run, node)
    node_runs: HashMap<String, HashMap<String, NodeRun>>,
    errors: HashMap<String, Value>,
}

/// In-memory gateway used by tests and the CLI harness
#[derive(Clone, Default)]
pub struct MemoryGateway {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a run and its graph (test/CLI setup)
    pub async fn insert_run(&self, run: WorkflowRun, nodes: Value, edges: Value) {
        let mut state = self.state.lock().await;
        state.graphs.insert(run.id.clone(), StoredGraph { nodes, edges });
        state.runs.insert(run.id.clone(), run);
    }

    /// Seed an existing node-run row (resume-scenario setup)
    pub async fn insert_node_run(&self, run_id: &str, record: NodeRun) {
        let mut state = self.state.lock().await;
        state
            .node_runs
            .entry(run_id.to_string())
            .or_default()
            .insert(record.node_id.clone(), record);
    }

    /// The error payload recorded at finalization, if any
    pub async fn run_error(&self, run_id: &str) -> Option<Value> {
        self.state.lock().await.errors.get(run_id).cloned()
    }
}

#[async_trait]
impl RunStateGateway for MemoryGateway {
    async fn load_run(&self, run_id: &str) -> Result<WorkflowRun, EngineError> {
        self.state
            .lock()
            .await
            .runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))
    }

    async fn load_graph(&self, run_id: &str) -> Result<StoredGraph, EngineError> {
        self.state
            .lock()
            .await
            .graphs
            .get(run_id)
            .cloned()
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))
    }

    async fn node_runs(&self, run_id: &str) -> Result<Vec<NodeRun>, EngineError> {
        Ok(self
            .state
            .lock()
            .await
            .node_runs
            .get(run_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn save_node_run(&self, run_id: &str, mut record: NodeRun) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        let rows = state.node_runs.entry(run_id.to_string()).or_default();
        if let Some(existing) = rows.get(&record.node_id) {
            // Upsert keeps the original row identity
            record.id = existing.id.clone();
        }
        rows.insert(record.node_id.clone(), record);
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<Value>,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        if let Some(err) = error {
            state.errors.insert(run_id.to_string(), err);
        }
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        run.status = status;
        run.finished_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::types::{ExecutionMode, NodeRunStatus};
    use serde_json::json;

    fn make_run(id: &str) -> WorkflowRun {
        WorkflowRun {
            id: id.to_string(),
            status: RunStatus::Pending,
            metadata: json!({}),
            execution_mode: ExecutionMode::Legacy,
            user_id: None,
            finished_at: None,
        }
    }

    fn make_node_run(id: &str, node_id: &str, status: NodeRunStatus) -> NodeRun {
        NodeRun {
            id: id.to_string(),
            node_id: node_id.to_string(),
            node_type: "agent".to_string(),
            status,
            retry_count: 0,
            output: None,
            started_at: None,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn test_load_missing_run() {
        let gateway = MemoryGateway::new();
        assert!(matches!(
            gateway.load_run("nope").await,
            Err(EngineError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_keeps_row_identity() {
        let gateway = MemoryGateway::new();
        gateway
            .insert_run(make_run("r1"), json!([]), json!([]))
            .await;

        gateway
            .save_node_run("r1", make_node_run("row-1", "a", NodeRunStatus::Running))
            .await
            .unwrap();
        gateway
            .save_node_run("r1", make_node_run("row-2", "a", NodeRunStatus::Success))
            .await
            .unwrap();

        let rows = gateway.node_runs("r1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "row-1");
        assert_eq!(rows[0].status, NodeRunStatus::Success);
    }

    #[tokio::test]
    async fn test_finish_run_records_status_and_error() {
        let gateway = MemoryGateway::new();
        gateway
            .insert_run(make_run("r1"), json!([]), json!([]))
            .await;

        gateway
            .finish_run("r1", RunStatus::Failure, Some(json!({"message": "boom"})))
            .await
            .unwrap();

        let run = gateway.load_run("r1").await.unwrap();
        assert_eq!(run.status, RunStatus::Failure);
        assert!(run.finished_at.is_some());
        assert_eq!(gateway.run_error("r1").await, Some(json!({"message": "boom"})));
    }
}
