// SPDX-License-Identifier: MIT

//! Run and node-run records
//!
//! These mirror the persisted rows: one `WorkflowRun` per execution
//! request, at most one `NodeRun` per (run, node). Transient scheduling
//! state is always rebuilt from these rows, never assumed to survive a
//! crash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A node that failed this many times is terminal and no longer eligible
/// for re-execution on resume.
pub const MAX_NODE_RETRIES: u32 = 3;

/// Terminal status of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Success,
    Failure,
}

/// Status of a single node within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRunStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

/// Run-level execution mode, passed through to node executors.
///
/// The scheduler is agnostic to it; executors use it to decide whether
/// missing configuration is a hard failure or a soft skip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum ExecutionMode {
    #[default]
    #[serde(rename = "legacy")]
    Legacy,
    #[serde(rename = "strict_template_v1")]
    StrictTemplateV1,
}

/// How a run was started, parsed from `metadata.source`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "source")]
pub enum RunTrigger {
    /// Started from the dashboard: every active manual trigger fires
    #[serde(rename = "manual")]
    Manual,
    /// Single-node execution of one specific node
    #[serde(rename = "manual-node")]
    ManualNode {
        #[serde(rename = "nodeId")]
        node_id: String,
    },
    /// A specific webhook trigger node fired
    #[serde(rename = "webhook")]
    Webhook {
        #[serde(rename = "nodeId")]
        node_id: String,
    },
    /// A specific cron trigger node fired
    #[serde(rename = "cron")]
    Cron {
        #[serde(rename = "nodeId")]
        node_id: String,
    },
}

/// A persisted workflow run record
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowRun {
    pub id: String,
    pub status: RunStatus,
    /// Raw metadata object; `source` discriminates the trigger shape
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    /// Owner of the workflow, forwarded to node executors
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    /// Parse the trigger shape out of the metadata. `Ok(None)` means the
    /// metadata carries no `source` and default trigger selection applies.
    pub fn trigger(&self) -> Result<Option<RunTrigger>, crate::error::EngineError> {
        let source = match self.metadata.get("source") {
            Some(Value::String(_)) => &self.metadata,
            _ => return Ok(None),
        };
        serde_json::from_value(source.clone())
            .map(Some)
            .map_err(|e| crate::error::EngineError::InvalidMetadata(e.to_string()))
    }
}

/// A persisted node execution record (one per (run, node) at most)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeRun {
    pub id: String,
    pub node_id: String,
    pub node_type: String,
    pub status: NodeRunStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl NodeRun {
    /// Whether this is a bypass record: skipped because the node was
    /// deactivated, logically completed via passthrough.
    pub fn is_bypassed(&self) -> bool {
        self.status == NodeRunStatus::Skipped
            && self
                .output
                .as_ref()
                .and_then(|o| o.get("bypassed"))
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }

    /// The upstream output carried through a bypassed node
    pub fn passthrough(&self) -> Option<&Value> {
        self.output.as_ref().and_then(|o| o.get("passthrough"))
    }
}

/// Output recorded for an ordinary routing skip
pub fn skip_output() -> Value {
    json!({"skipped": true})
}

/// Output recorded for a deactivated-but-satisfied (bypassed) node
pub fn bypass_output(passthrough: Value) -> Value {
    json!({"skipped": true, "bypassed": true, "passthrough": passthrough})
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_with_metadata(metadata: Value) -> WorkflowRun {
        WorkflowRun {
            id: "run-1".to_string(),
            status: RunStatus::Pending,
            metadata,
            execution_mode: ExecutionMode::Legacy,
            user_id: None,
            finished_at: None,
        }
    }

    #[test]
    fn test_trigger_manual() {
        let run = run_with_metadata(json!({"source": "manual"}));
        assert_eq!(run.trigger().unwrap(), Some(RunTrigger::Manual));
    }

    #[test]
    fn test_trigger_manual_node() {
        let run = run_with_metadata(json!({"source": "manual-node", "nodeId": "n1"}));
        assert_eq!(
            run.trigger().unwrap(),
            Some(RunTrigger::ManualNode {
                node_id: "n1".to_string()
            })
        );
    }

    #[test]
    fn test_trigger_webhook_with_extra_fields() {
        let run = run_with_metadata(json!({
            "source": "webhook", "nodeId": "hook", "path": "/in/abc"
        }));
        assert_eq!(
            run.trigger().unwrap(),
            Some(RunTrigger::Webhook {
                node_id: "hook".to_string()
            })
        );
    }

    #[test]
    fn test_trigger_absent_source() {
        let run = run_with_metadata(json!({}));
        assert_eq!(run.trigger().unwrap(), None);
    }

    #[test]
    fn test_trigger_unknown_source_is_invalid() {
        let run = run_with_metadata(json!({"source": "carrier-pigeon"}));
        assert!(run.trigger().is_err());
    }

    #[test]
    fn test_execution_mode_tags() {
        assert_eq!(
            serde_json::to_value(ExecutionMode::StrictTemplateV1).unwrap(),
            json!("strict_template_v1")
        );
        assert_eq!(
            serde_json::from_value::<ExecutionMode>(json!("legacy")).unwrap(),
            ExecutionMode::Legacy
        );
    }

    #[test]
    fn test_bypass_record() {
        let record = NodeRun {
            id: "nr-1".to_string(),
            node_id: "b".to_string(),
            node_type: "agent".to_string(),
            status: NodeRunStatus::Skipped,
            retry_count: 0,
            output: Some(bypass_output(json!({"x": 1}))),
            started_at: None,
            completed_at: None,
        };
        assert!(record.is_bypassed());
        assert_eq!(record.passthrough(), Some(&json!({"x": 1})));
    }

    #[test]
    fn test_routing_skip_is_not_bypass() {
        let record = NodeRun {
            id: "nr-1".to_string(),
            node_id: "b".to_string(),
            node_type: "agent".to_string(),
            status: NodeRunStatus::Skipped,
            retry_count: 0,
            output: Some(skip_output()),
            started_at: None,
            completed_at: None,
        };
        assert!(!record.is_bypassed());
        assert!(record.passthrough().is_none());
    }
}
