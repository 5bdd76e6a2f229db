// SPDX-License-Identifier: MIT

//! Workflow execution engine

pub mod executor;

pub use executor::WorkflowEngine;
