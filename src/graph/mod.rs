// SPDX-License-Identifier: MIT

//! Workflow graph model and analysis
//!
//! This module provides:
//! - `WorkflowNode` / `WorkflowEdge` - the persisted graph shapes
//! - `parse_nodes` / `parse_edges` - tolerant-but-loud deserialization
//! - cycle detection and forward reachability used by the scheduler

pub mod analysis;
pub mod parse;
pub mod types;

pub use analysis::{find_cycle, incoming_by_target, outgoing_by_source, reachable_from};
pub use parse::{parse_edges, parse_nodes};
pub use types::{EdgeData, WorkflowEdge, WorkflowNode, CONDITION_TYPE, TRIGGER_TYPES};
