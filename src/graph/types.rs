// SPDX-License-Identifier: MIT

//! Persisted workflow graph types
//!
//! Nodes and edges are stored as JSON by the dashboard; the engine only
//! depends on the handful of fields that drive scheduling (`type`,
//! `data.isActive`, condition routes, edge route markers).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Node type tags that can act as a graph entry point
pub const TRIGGER_TYPES: [&str; 4] = [
    "manualTrigger",
    "triggerNode",
    "webhookTrigger",
    "cronTrigger",
];

/// Node type tag for condition (multi-route) nodes
pub const CONDITION_TYPE: &str = "condition";

/// A node in a persisted workflow graph
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowNode {
    /// Unique node identifier
    pub id: String,
    /// Node type tag (decides trigger-ness and executor dispatch)
    #[serde(rename = "type")]
    pub node_type: String,
    /// Node configuration payload
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl WorkflowNode {
    /// Whether this node runs at all (`data.isActive`, default true)
    pub fn is_active(&self) -> bool {
        self.data
            .get("isActive")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    /// Whether this node type can be a graph entry point
    pub fn is_trigger(&self) -> bool {
        TRIGGER_TYPES.contains(&self.node_type.as_str())
    }

    /// Whether this node type can start a manual run
    pub fn is_manual_trigger(&self) -> bool {
        self.node_type == "manualTrigger" || self.node_type == "triggerNode"
    }

    /// Whether this node selects a route for its outgoing edges
    pub fn is_condition(&self) -> bool {
        self.node_type == CONDITION_TYPE
    }

    /// Configured route names for a condition node
    pub fn routes(&self) -> Vec<String> {
        self.data
            .get("routes")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The route taken when a condition node cannot evaluate (bypass) or
    /// when its output names no route
    pub fn default_route(&self) -> String {
        self.data
            .get("defaultRoute")
            .and_then(Value::as_str)
            .unwrap_or("default")
            .to_string()
    }
}

/// An edge in a persisted workflow graph
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowEdge {
    /// Unique edge identifier
    pub id: String,
    /// Source node id
    pub source: String,
    /// Target node id
    pub target: String,
    /// Branch marker for multi-output source nodes
    #[serde(rename = "sourceHandle", default)]
    pub source_handle: Option<String>,
    /// Optional edge payload (may carry a `route` marker)
    #[serde(default)]
    pub data: Option<EdgeData>,
}

/// Edge payload as stored by the canvas editor
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EdgeData {
    #[serde(default)]
    pub route: Option<String>,
}

impl WorkflowEdge {
    /// Which branch of the source node this edge represents.
    /// `sourceHandle` wins over `data.route`; absence means unconditional.
    pub fn route_marker(&self) -> Option<&str> {
        self.source_handle
            .as_deref()
            .or_else(|| self.data.as_ref().and_then(|d| d.route.as_deref()))
    }
}
