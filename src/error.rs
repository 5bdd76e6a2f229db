// SPDX-License-Identifier: MIT

//! Typed error handling for cascade-rs
//!
//! Structural errors are fatal graph-level conditions detected before any
//! node executes; everything else is an `EngineError`.

use thiserror::Error;

/// Top-level error type for the execution engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Fatal graph-level condition detected before the batch loop starts
    #[error("Structural error: {0}")]
    Structural(#[from] StructuralError),

    /// Run record not found in the state gateway
    #[error("Workflow run '{0}' not found")]
    RunNotFound(String),

    /// Persisted graph payload could not be parsed
    #[error("Invalid workflow graph: {0}")]
    InvalidGraph(String),

    /// Run metadata could not be interpreted
    #[error("Invalid run metadata: {0}")]
    InvalidMetadata(String),

    /// No executor registered for a node type
    #[error("No executor registered for node type '{0}'")]
    ExecutorNotFound(String),

    /// A node executor reported a failure
    #[error("Node '{node_id}' failed: {message}")]
    NodeFailed { node_id: String, message: String },

    /// Backing store failure (gateway, lock store)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Event channel failure (callers treat publish as best-effort)
    #[error("Publish error: {0}")]
    Publish(String),
}

/// Fatal, non-retryable graph conditions (no node executes)
#[derive(Debug, Error)]
pub enum StructuralError {
    /// Cycle detected in the workflow graph
    #[error("Cycle detected in workflow graph: {0:?}")]
    CycleDetected(Vec<String>),

    /// Target node for a single-node run does not exist
    #[error("Target node '{0}' not found in workflow")]
    TargetNodeMissing(String),

    /// Target node for a single-node run is deactivated
    #[error("Target node '{0}' is deactivated")]
    TargetNodeDeactivated(String),

    /// Manual run but the workflow has no active manual trigger
    #[error("No active manual trigger in workflow")]
    NoActiveManualTrigger,

    /// Workflow has trigger nodes but every one of them is deactivated
    #[error("All triggers are deactivated")]
    AllTriggersDeactivated,

    /// Workflow has no trigger node at all
    #[error("Workflow has no trigger node")]
    NoTriggerNode,

    /// The node named by webhook/cron metadata is missing or the wrong type
    #[error("Trigger node '{node_id}' mismatch: {reason}")]
    TriggerMismatch { node_id: String, reason: String },
}

impl EngineError {
    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a node failure error
    pub fn node_failed(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NodeFailed {
            node_id: node_id.into(),
            message: message.into(),
        }
    }
}
