// SPDX-License-Identifier: MIT

//! Batch-based workflow execution
//!
//! `WorkflowEngine` takes a run id and drives the run to completion:
//! exclusive ownership via the lock manager, trigger selection, graph
//! pruning, resume seeding from persisted node runs, then the
//! skip / bypass / execute batch loop until nothing is pending.

use futures::future::join_all;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{EngineError, StructuralError};
use crate::events::{run_topic, EventPublisher, RunEvent};
use crate::graph::{
    find_cycle, incoming_by_target, outgoing_by_source, parse_edges, parse_nodes, reachable_from,
    WorkflowEdge, WorkflowNode,
};
use crate::lock::{LockManager, HEARTBEAT_INTERVAL};
use crate::nodes::{ExecutionContext, ExecutorRegistry, NodeExecutor};
use crate::run::{
    bypass_output, skip_output, NodeRun, NodeRunStatus, RunStateGateway, RunStatus, RunTrigger,
    WorkflowRun, MAX_NODE_RETRIES,
};

/// Drives workflow runs to completion on behalf of one worker
pub struct WorkflowEngine {
    gateway: Arc<dyn RunStateGateway>,
    locks: Arc<dyn LockManager>,
    events: Arc<dyn EventPublisher>,
    executors: ExecutorRegistry,
    /// Owner id for the run lock, injected at construction so tests can
    /// use fake owners
    worker_id: String,
    heartbeat_interval: Duration,
}

impl WorkflowEngine {
    pub fn new(
        gateway: Arc<dyn RunStateGateway>,
        locks: Arc<dyn LockManager>,
        events: Arc<dyn EventPublisher>,
        executors: ExecutorRegistry,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            locks,
            events,
            executors,
            worker_id: worker_id.into(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }

    /// Override the renew cadence. Production keeps the default of half
    /// the lock TTL; tests pair this with a short-TTL lock manager.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Execute a run end to end.
    ///
    /// Returns `Ok(None)` when another worker already owns the run (the
    /// normal contention path). Any error marks the run `Failure` with a
    /// `{message, workerId}` payload, releases the lock, and is re-raised
    /// so the outer job queue can apply its own retry policy.
    pub async fn execute_workflow(&self, run_id: &str) -> Result<Option<RunStatus>, EngineError> {
        if !self.locks.acquire(run_id, &self.worker_id).await? {
            log::debug!("run {} is owned by another worker, skipping", run_id);
            return Ok(None);
        }

        let heartbeat = self.spawn_heartbeat(run_id);
        let result = self.drive_run(run_id).await;
        heartbeat.abort();

        let outcome = match result {
            Ok(status) => Ok(Some(status)),
            Err(err) => {
                let payload = json!({
                    "message": err.to_string(),
                    "workerId": self.worker_id,
                });
                if let Err(save_err) = self
                    .gateway
                    .finish_run(run_id, RunStatus::Failure, Some(payload.clone()))
                    .await
                {
                    log::error!("failed to record failure for run {}: {}", run_id, save_err);
                }
                self.publish(run_id, RunEvent::workflow(RunStatus::Failure, Some(payload)));
                Err(err)
            }
        };

        match self.locks.release(run_id, &self.worker_id).await {
            Ok(true) => {}
            Ok(false) => log::warn!("lock for run {} was no longer ours at release", run_id),
            Err(e) => log::warn!("lock release failed for run {}: {}", run_id, e),
        }

        outcome
    }

    async fn drive_run(&self, run_id: &str) -> Result<RunStatus, EngineError> {
        let run = self.gateway.load_run(run_id).await?;
        let graph = self.gateway.load_graph(run_id).await?;
        let nodes = parse_nodes(&graph.nodes)?;
        let edges = parse_edges(&graph.edges)?;

        // Cycle check runs over the full graph before any node run exists
        if let Some(path) = find_cycle(&nodes, &edges) {
            return Err(StructuralError::CycleDetected(path).into());
        }

        let trigger = run.trigger()?;

        if let Some(RunTrigger::ManualNode { node_id }) = &trigger {
            return self.execute_single_node(&run, &nodes, node_id).await;
        }

        let start_ids = select_start_nodes(&nodes, trigger.as_ref())?;
        self.run_batches(&run, &nodes, &edges, start_ids).await
    }

    /// Single-node mode: one target node, no batch scheduling
    async fn execute_single_node(
        &self,
        run: &WorkflowRun,
        nodes: &[WorkflowNode],
        node_id: &str,
    ) -> Result<RunStatus, EngineError> {
        let node = nodes
            .iter()
            .find(|n| n.id == node_id)
            .ok_or_else(|| StructuralError::TargetNodeMissing(node_id.to_string()))?;
        if !node.is_active() {
            return Err(StructuralError::TargetNodeDeactivated(node_id.to_string()).into());
        }

        let prior = self.gateway.node_runs(&run.id).await?;
        let (_, result) = self.run_node(run, node, &prior, 0).await;

        let status = match result {
            Ok(_) => RunStatus::Success,
            Err(_) => RunStatus::Failure,
        };
        let error = match status {
            RunStatus::Failure => Some(json!({
                "message": format!("node {} failed", node_id),
            })),
            _ => None,
        };
        self.gateway.finish_run(&run.id, status, error.clone()).await?;
        self.publish(&run.id, RunEvent::workflow(status, error));
        Ok(status)
    }

    /// The general path: prune, seed, then loop skip/bypass/execute
    async fn run_batches(
        &self,
        run: &WorkflowRun,
        nodes: &[WorkflowNode],
        edges: &[WorkflowEdge],
        start_ids: Vec<String>,
    ) -> Result<RunStatus, EngineError> {
        let reachable = reachable_from(edges, start_ids);
        let sub_edges: Vec<WorkflowEdge> = edges
            .iter()
            .filter(|e| reachable.contains(&e.source) && reachable.contains(&e.target))
            .cloned()
            .collect();
        let sub_nodes: Vec<&WorkflowNode> =
            nodes.iter().filter(|n| reachable.contains(&n.id)).collect();

        let mut sched = Scheduler::new(&sub_nodes, &sub_edges);

        // Resume: rebuild scheduling state from persisted rows
        let prior = self.gateway.node_runs(&run.id).await?;
        sched.seed(&prior);

        let mut node_index = sched.resolved_count();

        loop {
            if sched.pending_ids().is_empty() {
                break;
            }
            let mut progressed = false;

            // Pass 1: cascade skips along un-taken branches
            let skippable = sched.skippable_ids();
            for node_id in skippable {
                let node = sched.node(&node_id);
                log::debug!("run {}: skipping node {}", run.id, node_id);
                self.record_skip(&run.id, node, skip_output()).await?;
                sched.mark_skipped(&node_id);
                progressed = true;
            }

            // Pass 2: bypass deactivated nodes whose dependencies are done
            let bypassable = sched.bypassable_ids();
            for node_id in bypassable {
                let node = sched.node(&node_id);
                let passthrough = sched.bypass_passthrough(&node_id);
                log::debug!("run {}: bypassing deactivated node {}", run.id, node_id);
                self.record_skip(&run.id, node, bypass_output(passthrough.clone()))
                    .await?;
                sched.mark_bypassed(&node_id, passthrough);
                progressed = true;
            }

            // Pass 3: execute every eligible node in parallel
            let runnable = sched.runnable_ids();
            if !runnable.is_empty() {
                let prior = self.gateway.node_runs(&run.id).await?;
                let batch = runnable.iter().enumerate().map(|(offset, node_id)| {
                    let node = sched.node(node_id);
                    self.run_node(run, node, &prior, node_index + offset)
                });
                let results = join_all(batch).await;
                node_index += runnable.len();

                for (node_id, result) in results {
                    match result {
                        Ok(output) => sched.mark_completed(&node_id, output),
                        Err(message) => {
                            log::warn!("run {}: node {} failed: {}", run.id, node_id, message);
                            sched.mark_failed(&node_id);
                        }
                    }
                }
                progressed = true;
            }

            if !progressed {
                log::warn!(
                    "run {}: no executable or skippable nodes left, unresolved: {:?}",
                    run.id,
                    sched.pending_ids()
                );
                break;
            }
        }

        let unresolved = sched.pending_ids();
        let status = sched.final_status();
        let error = match status {
            RunStatus::Failure if !sched.failed.is_empty() => Some(json!({
                "message": "one or more nodes failed",
                "nodes": sched.failed.iter().collect::<Vec<_>>(),
            })),
            RunStatus::Failure => Some(json!({
                "message": "workflow finished with unresolved nodes",
                "unresolved": unresolved,
            })),
            _ => None,
        };

        self.gateway.finish_run(&run.id, status, error.clone()).await?;
        self.publish(&run.id, RunEvent::workflow(status, error));
        Ok(status)
    }

    /// Execute one node through the registry, recording Running and the
    /// terminal row. Failures are converted into a failed row, never
    /// propagated into the batch.
    async fn run_node(
        &self,
        run: &WorkflowRun,
        node: &WorkflowNode,
        prior: &[NodeRun],
        node_index: usize,
    ) -> (String, Result<Value, String>) {
        let retry_count = prior
            .iter()
            .find(|r| r.node_id == node.id)
            .map(|r| r.retry_count)
            .unwrap_or(0);

        let mut record = NodeRun {
            id: Uuid::new_v4().to_string(),
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            status: NodeRunStatus::Running,
            retry_count,
            output: None,
            started_at: Some(chrono::Utc::now()),
            completed_at: None,
        };
        if let Err(e) = self.gateway.save_node_run(&run.id, record.clone()).await {
            return (node.id.clone(), Err(format!("failed to record node run: {}", e)));
        }
        self.publish(
            &run.id,
            RunEvent::node(&node.id, &node.node_type, NodeRunStatus::Running),
        );

        let result = match self.executors.get(&node.node_type).await {
            Some(executor) => {
                let ctx = ExecutionContext {
                    run_id: &run.id,
                    node,
                    prior_node_runs: prior,
                    execution_mode: run.execution_mode,
                    user_id: run.user_id.as_deref(),
                    node_index,
                };
                executor.execute(ctx).await.map_err(|e| e.to_string())
            }
            None => Err(EngineError::ExecutorNotFound(node.node_type.clone()).to_string()),
        };

        record.completed_at = Some(chrono::Utc::now());
        match &result {
            Ok(output) => {
                record.status = NodeRunStatus::Success;
                record.output = Some(output.clone());
            }
            Err(message) => {
                record.status = NodeRunStatus::Failed;
                record.retry_count = retry_count + 1;
                record.output = Some(json!({"error": message}));
            }
        }
        let status = record.status;
        if let Err(e) = self.gateway.save_node_run(&run.id, record).await {
            log::error!("run {}: failed to persist node {} result: {}", run.id, node.id, e);
        }
        self.publish(&run.id, RunEvent::node(&node.id, &node.node_type, status));

        (node.id.clone(), result)
    }

    async fn record_skip(
        &self,
        run_id: &str,
        node: &WorkflowNode,
        output: Value,
    ) -> Result<(), EngineError> {
        self.gateway
            .save_node_run(
                run_id,
                NodeRun {
                    id: Uuid::new_v4().to_string(),
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                    status: NodeRunStatus::Skipped,
                    retry_count: 0,
                    output: Some(output),
                    started_at: None,
                    completed_at: Some(chrono::Utc::now()),
                },
            )
            .await?;
        self.publish(
            run_id,
            RunEvent::node(&node.id, &node.node_type, NodeRunStatus::Skipped),
        );
        Ok(())
    }

    /// Best-effort status broadcast; never awaited for correctness
    fn publish(&self, run_id: &str, event: RunEvent) {
        let events = self.events.clone();
        let topic = run_topic(run_id);
        tokio::spawn(async move {
            if let Err(e) = events.publish(&topic, event).await {
                log::debug!("event publish failed on {}: {}", topic, e);
            }
        });
    }

    /// Renew the lock at half the TTL; a failed renew is logged, never
    /// fatal - losing the lease just means another worker may take over.
    fn spawn_heartbeat(&self, run_id: &str) -> tokio::task::JoinHandle<()> {
        let locks = self.locks.clone();
        let run_id = run_id.to_string();
        let owner = self.worker_id.clone();
        let interval = self.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // interval fires immediately; skip the first tick
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match locks.renew(&run_id, &owner).await {
                    Ok(true) => {}
                    Ok(false) => log::warn!("lost lock lease for run {}", run_id),
                    Err(e) => log::warn!("lock renew failed for run {}: {}", run_id, e),
                }
            }
        })
    }
}

/// Resolve the run's entry points from its trigger metadata
fn select_start_nodes(
    nodes: &[WorkflowNode],
    trigger: Option<&RunTrigger>,
) -> Result<Vec<String>, StructuralError> {
    match trigger {
        Some(RunTrigger::Manual) => {
            let active: Vec<String> = nodes
                .iter()
                .filter(|n| n.is_manual_trigger() && n.is_active())
                .map(|n| n.id.clone())
                .collect();
            if !active.is_empty() {
                return Ok(active);
            }
            if nodes.iter().any(|n| n.is_manual_trigger()) {
                Err(StructuralError::AllTriggersDeactivated)
            } else {
                Err(StructuralError::NoActiveManualTrigger)
            }
        }
        Some(RunTrigger::Webhook { node_id }) => {
            named_trigger(nodes, node_id, "webhookTrigger")
        }
        Some(RunTrigger::Cron { node_id }) => named_trigger(nodes, node_id, "cronTrigger"),
        Some(RunTrigger::ManualNode { .. }) => {
            unreachable!("single-node runs never reach trigger selection")
        }
        None => {
            let active: Vec<String> = nodes
                .iter()
                .filter(|n| n.is_trigger() && n.is_active())
                .map(|n| n.id.clone())
                .collect();
            if !active.is_empty() {
                return Ok(active);
            }
            if nodes.iter().any(|n| n.is_trigger()) {
                Err(StructuralError::AllTriggersDeactivated)
            } else {
                Err(StructuralError::NoTriggerNode)
            }
        }
    }
}

/// Verify the trigger node named by webhook/cron metadata
fn named_trigger(
    nodes: &[WorkflowNode],
    node_id: &str,
    expected_type: &str,
) -> Result<Vec<String>, StructuralError> {
    let node = nodes.iter().find(|n| n.id == node_id).ok_or_else(|| {
        StructuralError::TriggerMismatch {
            node_id: node_id.to_string(),
            reason: "node does not exist in workflow".to_string(),
        }
    })?;
    if node.node_type != expected_type {
        return Err(StructuralError::TriggerMismatch {
            node_id: node_id.to_string(),
            reason: format!("expected type {}, found {}", expected_type, node.node_type),
        });
    }
    if !node.is_active() {
        return Err(StructuralError::TriggerMismatch {
            node_id: node_id.to_string(),
            reason: "trigger node is deactivated".to_string(),
        });
    }
    Ok(vec![node_id.to_string()])
}

/// Pure scheduling state over the pruned subgraph.
///
/// A node is in exactly one of {pending, completed, failed, skipped};
/// edge activation is only recorded for condition outputs, every other
/// edge is implicitly active.
struct Scheduler<'a> {
    order: Vec<&'a str>,
    node_by_id: HashMap<&'a str, &'a WorkflowNode>,
    incoming: HashMap<&'a str, Vec<&'a WorkflowEdge>>,
    outgoing: HashMap<&'a str, Vec<&'a WorkflowEdge>>,
    completed: HashSet<String>,
    failed: HashSet<String>,
    skipped: HashSet<String>,
    outputs: HashMap<String, Value>,
    edge_active: HashMap<String, bool>,
}

impl<'a> Scheduler<'a> {
    fn new(nodes: &[&'a WorkflowNode], edges: &'a [WorkflowEdge]) -> Self {
        Self {
            order: nodes.iter().map(|n| n.id.as_str()).collect(),
            node_by_id: nodes.iter().map(|n| (n.id.as_str(), *n)).collect(),
            incoming: incoming_by_target(edges),
            outgoing: outgoing_by_source(edges),
            completed: HashSet::new(),
            failed: HashSet::new(),
            skipped: HashSet::new(),
            outputs: HashMap::new(),
            edge_active: HashMap::new(),
        }
    }

    fn node(&self, id: &str) -> &'a WorkflowNode {
        self.node_by_id[id]
    }

    /// Rebuild state from persisted node runs (resume-after-crash)
    fn seed(&mut self, prior: &[NodeRun]) {
        let mut bypassed: HashSet<String> = HashSet::new();
        for record in prior {
            if !self.node_by_id.contains_key(record.node_id.as_str()) {
                continue;
            }
            match record.status {
                NodeRunStatus::Success => {
                    self.completed.insert(record.node_id.clone());
                    self.outputs.insert(
                        record.node_id.clone(),
                        record.output.clone().unwrap_or(Value::Null),
                    );
                }
                NodeRunStatus::Skipped if record.is_bypassed() => {
                    // Bypass is "logically succeeded": the passthrough is
                    // this node's output for everything downstream
                    self.completed.insert(record.node_id.clone());
                    bypassed.insert(record.node_id.clone());
                    self.outputs.insert(
                        record.node_id.clone(),
                        record.passthrough().cloned().unwrap_or(Value::Null),
                    );
                }
                NodeRunStatus::Skipped => {
                    self.skipped.insert(record.node_id.clone());
                }
                NodeRunStatus::Failed if record.retry_count >= MAX_NODE_RETRIES => {
                    self.failed.insert(record.node_id.clone());
                }
                // Pending / Running / Failed-with-retries-left rows stay
                // eligible for re-execution
                _ => {}
            }
        }

        // Replay recorded condition outputs so edge activation is
        // consistent before the loop starts. A bypassed condition never
        // evaluated, so its passthrough is not a routing decision; it
        // routes along its default exactly as it did on first execution.
        let replay: Vec<String> = self
            .completed
            .iter()
            .filter(|id| self.node(id).is_condition())
            .cloned()
            .collect();
        for id in replay {
            let output = if bypassed.contains(&id) {
                None
            } else {
                self.outputs.get(&id).cloned()
            };
            self.apply_condition_routing(&id, output.as_ref());
        }
    }

    fn resolved(&self, id: &str) -> bool {
        self.completed.contains(id) || self.failed.contains(id) || self.skipped.contains(id)
    }

    fn resolved_count(&self) -> usize {
        self.completed.len() + self.failed.len() + self.skipped.len()
    }

    fn edge_is_active(&self, edge: &WorkflowEdge) -> bool {
        self.edge_active.get(&edge.id).copied().unwrap_or(true)
    }

    fn pending_ids(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| !self.resolved(id))
            .map(|id| id.to_string())
            .collect()
    }

    /// Skippable: every incoming source resolved, and no active edge fed
    /// by anything other than a skipped source. Entry nodes (no incoming
    /// edges) are never auto-skipped.
    fn skippable_ids(&self) -> Vec<String> {
        self.pending_ids()
            .into_iter()
            .filter(|id| {
                let incoming = match self.incoming.get(id.as_str()) {
                    Some(edges) if !edges.is_empty() => edges,
                    _ => return false,
                };
                incoming.iter().all(|e| self.resolved(&e.source))
                    && incoming
                        .iter()
                        .filter(|e| self.edge_is_active(e))
                        .all(|e| self.skipped.contains(&e.source))
            })
            .collect()
    }

    /// Bypassable: deactivated but its dependencies are satisfied
    fn bypassable_ids(&self) -> Vec<String> {
        self.pending_ids()
            .into_iter()
            .filter(|id| !self.node(id).is_active() && self.can_execute(id))
            .collect()
    }

    /// Runnable: active and every dependency rule holds
    fn runnable_ids(&self) -> Vec<String> {
        self.pending_ids()
            .into_iter()
            .filter(|id| self.node(id).is_active() && self.can_execute(id))
            .collect()
    }

    /// Dependency rules for execution:
    /// - no incoming edges: always executable
    /// - an unresolved condition source blocks (route not decided yet)
    /// - every active edge's source must be completed
    /// - at least one active, completed dependency must exist
    fn can_execute(&self, id: &str) -> bool {
        let incoming = match self.incoming.get(id) {
            Some(edges) if !edges.is_empty() => edges,
            _ => return true,
        };

        for edge in incoming {
            if let Some(source) = self.node_by_id.get(edge.source.as_str()) {
                if source.is_condition() && !self.resolved(&edge.source) {
                    return false;
                }
            }
        }

        let mut has_active_completed = false;
        for edge in incoming.iter().filter(|e| self.edge_is_active(e)) {
            if !self.completed.contains(&edge.source) {
                return false;
            }
            has_active_completed = true;
        }
        has_active_completed
    }

    /// Passthrough value for a bypassed node: single resolved upstream
    /// yields its output directly, multiple yield an object keyed by
    /// source node id.
    fn bypass_passthrough(&self, id: &str) -> Value {
        let mut upstream: Vec<(&str, &Value)> = self
            .incoming
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .filter(|e| self.edge_is_active(e) && self.completed.contains(&e.source))
            .filter_map(|e| {
                self.outputs
                    .get(&e.source)
                    .map(|output| (e.source.as_str(), output))
            })
            .collect();
        upstream.dedup_by_key(|(source, _)| *source);

        match upstream.len() {
            0 => Value::Null,
            1 => upstream[0].1.clone(),
            _ => {
                let mut map = Map::new();
                for (source, output) in upstream {
                    map.insert(source.to_string(), output.clone());
                }
                Value::Object(map)
            }
        }
    }

    fn mark_skipped(&mut self, id: &str) {
        self.skipped.insert(id.to_string());
    }

    /// A bypassed node counts as completed with its passthrough as output;
    /// a bypassed condition routes along its default (it cannot evaluate)
    fn mark_bypassed(&mut self, id: &str, passthrough: Value) {
        self.completed.insert(id.to_string());
        self.outputs.insert(id.to_string(), passthrough);
        if self.node(id).is_condition() {
            self.apply_condition_routing(id, None);
        }
    }

    fn mark_completed(&mut self, id: &str, output: Value) {
        self.completed.insert(id.to_string());
        if self.node(id).is_condition() {
            self.apply_condition_routing(id, Some(&output));
        }
        self.outputs.insert(id.to_string(), output);
    }

    fn mark_failed(&mut self, id: &str) {
        self.failed.insert(id.to_string());
    }

    /// Route selection: `output.route`, else `output.routes[0]`, else the
    /// node's configured default route
    fn select_route(&self, id: &str, output: Option<&Value>) -> String {
        output
            .and_then(|o| o.get("route"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                output
                    .and_then(|o| o.get("routes"))
                    .and_then(Value::as_array)
                    .and_then(|arr| arr.first())
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| self.node(id).default_route())
    }

    /// Activate the outgoing edges matching the selected route. Edges
    /// without a route marker are active only when the selected route is
    /// the node's default.
    fn apply_condition_routing(&mut self, id: &str, output: Option<&Value>) {
        let route = self.select_route(id, output);
        let default_route = self.node(id).default_route();
        let updates: Vec<(String, bool)> = self
            .outgoing
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .map(|edge| {
                let active = match edge.route_marker() {
                    Some(marker) => marker == route,
                    None => route == default_route,
                };
                (edge.id.clone(), active)
            })
            .collect();
        for (edge_id, active) in updates {
            self.edge_active.insert(edge_id, active);
        }
    }

    /// Final status: any failed node fails the run; success requires the
    /// whole reachable set to be completed or skipped. A run is never
    /// left `Pending`.
    fn final_status(&self) -> RunStatus {
        if !self.failed.is_empty() {
            RunStatus::Failure
        } else if self.completed.len() + self.skipped.len() == self.order.len() {
            RunStatus::Success
        } else {
            RunStatus::Failure
        }
    }
}
