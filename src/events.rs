// SPDX-License-Identifier: MIT

//! Run status event publishing
//!
//! One logical topic per run. Publishing is best-effort: the engine
//! dispatches events on a detached task and a publish failure never
//! fails the run.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;
use crate::run::NodeRunStatus;
use crate::run::RunStatus;

/// Topic name for a run's event stream
pub fn run_topic(run_id: &str) -> String {
    format!("workflow-run:{}", run_id)
}

/// A status-change event on a run's topic
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RunEvent {
    /// A node changed status
    Node {
        #[serde(rename = "nodeId")]
        node_id: String,
        status: NodeRunStatus,
        #[serde(rename = "nodeType")]
        node_type: String,
        timestamp: String,
    },
    /// The run itself changed status
    Workflow {
        status: RunStatus,
        timestamp: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },
}

impl RunEvent {
    pub fn node(node_id: &str, node_type: &str, status: NodeRunStatus) -> Self {
        Self::Node {
            node_id: node_id.to_string(),
            status,
            node_type: node_type.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn workflow(status: RunStatus, error: Option<Value>) -> Self {
        Self::Workflow {
            status,
            timestamp: Utc::now().to_rfc3339(),
            error,
        }
    }
}

/// Fire-and-forget event channel capability
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, event: RunEvent) -> Result<(), EngineError>;
}

/// Default publisher: logs events instead of sending them anywhere
#[derive(Default)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, topic: &str, event: RunEvent) -> Result<(), EngineError> {
        log::debug!(
            "event {} {}",
            topic,
            serde_json::to_string(&event).unwrap_or_else(|_| "<unserializable>".to_string())
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_name() {
        assert_eq!(run_topic("abc"), "workflow-run:abc");
    }

    #[test]
    fn test_node_event_shape() {
        let event = RunEvent::node("n1", "agent", NodeRunStatus::Success);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "node");
        assert_eq!(value["nodeId"], "n1");
        assert_eq!(value["nodeType"], "agent");
        assert_eq!(value["status"], "success");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_workflow_event_omits_empty_error() {
        let ok = serde_json::to_value(RunEvent::workflow(RunStatus::Success, None)).unwrap();
        assert!(ok.get("error").is_none());

        let failed = serde_json::to_value(RunEvent::workflow(
            RunStatus::Failure,
            Some(json!({"message": "boom"})),
        ))
        .unwrap();
        assert_eq!(failed["error"]["message"], "boom");
    }
}
