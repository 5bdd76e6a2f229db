// SPDX-License-Identifier: MIT

//! cascade-rs: a workflow execution engine
//!
//! Workflows are directed graphs of typed nodes. A run starts at its
//! trigger nodes and flows forward in parallel batches; condition nodes
//! pick a route and the un-taken branches cascade into skips. Exactly one
//! worker drives a run at a time, guarded by a TTL lock with a heartbeat,
//! and every node execution is persisted so a crashed run resumes where
//! it stopped instead of re-running finished work.
//!
//! The engine depends only on capabilities:
//! - [`run::RunStateGateway`] - persisted runs, graphs, and node runs
//! - [`lock::LockManager`] - exclusive run ownership
//! - [`events::EventPublisher`] - best-effort status broadcasts
//! - [`nodes::NodeExecutor`] - per-node-type behavior, via the registry
//!
//! ```no_run
//! use std::sync::Arc;
//! use cascade_rs::engine::WorkflowEngine;
//! use cascade_rs::events::LogPublisher;
//! use cascade_rs::lock::MemoryLockManager;
//! use cascade_rs::nodes::ExecutorRegistry;
//! use cascade_rs::run::MemoryGateway;
//!
//! # async fn demo() -> Result<(), cascade_rs::error::EngineError> {
//! let engine = WorkflowEngine::new(
//!     Arc::new(MemoryGateway::new()),
//!     Arc::new(MemoryLockManager::new()),
//!     Arc::new(LogPublisher),
//!     ExecutorRegistry::new(),
//!     "worker-1",
//! );
//! let status = engine.execute_workflow("run-id").await?;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod lock;
pub mod nodes;
pub mod run;

pub use engine::WorkflowEngine;
pub use error::{EngineError, StructuralError};
pub use nodes::{ExecutionContext, ExecutorRegistry, NodeExecutor};
pub use run::{RunStatus, WorkflowRun};
