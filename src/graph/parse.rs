// SPDX-License-Identifier: MIT

//! Deserialization of persisted node and edge lists
//!
//! Some historical rows store the arrays as JSON objects keyed by numeric
//! strings (`{"0": {...}, "1": {...}}`). The parsers normalize that shape
//! back to an array ordered by numeric key before deserializing. Malformed
//! entries are hard errors, never silently dropped.

use serde_json::Value;

use super::types::{WorkflowEdge, WorkflowNode};
use crate::error::EngineError;

/// Parse a persisted node list
pub fn parse_nodes(value: &Value) -> Result<Vec<WorkflowNode>, EngineError> {
    let entries = normalize_to_array(value, "nodes")?;
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            serde_json::from_value(entry.clone())
                .map_err(|e| EngineError::InvalidGraph(format!("node at index {}: {}", i, e)))
        })
        .collect()
}

/// Parse a persisted edge list
pub fn parse_edges(value: &Value) -> Result<Vec<WorkflowEdge>, EngineError> {
    let entries = normalize_to_array(value, "edges")?;
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            serde_json::from_value(entry.clone())
                .map_err(|e| EngineError::InvalidGraph(format!("edge at index {}: {}", i, e)))
        })
        .collect()
}

/// Accept a JSON array as-is, or an object whose keys are all numeric
/// strings, reordered by numeric key.
fn normalize_to_array(value: &Value, what: &str) -> Result<Vec<Value>, EngineError> {
    match value {
        Value::Array(arr) => Ok(arr.clone()),
        Value::Object(obj) => {
            let mut keyed: Vec<(usize, &Value)> = Vec::with_capacity(obj.len());
            for (key, entry) in obj {
                let index = key.parse::<usize>().map_err(|_| {
                    EngineError::InvalidGraph(format!(
                        "{} stored as object with non-numeric key '{}'",
                        what, key
                    ))
                })?;
                keyed.push((index, entry));
            }
            keyed.sort_by_key(|(index, _)| *index);
            Ok(keyed.into_iter().map(|(_, v)| v.clone()).collect())
        }
        other => Err(EngineError::InvalidGraph(format!(
            "{} must be an array, got {}",
            what,
            type_name(other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
