// SPDX-License-Identifier: MIT

//! Run records and the Run State Gateway
//!
//! This module provides:
//! - `WorkflowRun` / `NodeRun` - persisted execution history
//! - `RunStateGateway` - the load/save capability the engine depends on
//! - `MemoryGateway` - in-memory reference implementation

pub mod gateway;
pub mod types;

pub use gateway::{MemoryGateway, RunStateGateway, StoredGraph};
pub use types::{
    bypass_output, skip_output, ExecutionMode, NodeRun, NodeRunStatus, RunStatus, RunTrigger,
    WorkflowRun, MAX_NODE_RETRIES,
};
