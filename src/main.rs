// SPDX-License-Identifier: MIT

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use serde_json::{json, Value};
use std::sync::Arc;

use cascade_rs::engine::WorkflowEngine;
use cascade_rs::error::EngineError;
use cascade_rs::events::LogPublisher;
use cascade_rs::lock::MemoryLockManager;
use cascade_rs::nodes::{ExecutionContext, ExecutorRegistry, NodeExecutor};
use cascade_rs::run::{ExecutionMode, MemoryGateway, RunStateGateway, RunStatus, WorkflowRun};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a workflow from a file against the in-memory backends
    Run {
        /// Path to a workflow JSON file ({"nodes": [...], "edges": [...]})
        #[arg(short, long)]
        file: String,

        /// Trigger source to simulate (manual, webhook, cron)
        #[arg(short, long, default_value = "manual")]
        source: String,

        /// Trigger node id, required for webhook/cron sources
        #[arg(short, long)]
        node: Option<String>,
    },
}

/// Placeholder executor for dry runs: echoes the node's configuration
struct EchoExecutor;

#[async_trait::async_trait]
impl NodeExecutor for EchoExecutor {
    async fn execute(&self, ctx: ExecutionContext<'_>) -> Result<Value, EngineError> {
        Ok(json!({
            "nodeId": ctx.node.id,
            "nodeType": ctx.node.node_type,
            "data": Value::Object(ctx.node.data.clone()),
        }))
    }
}

fn run_metadata(source: &str, node: Option<&str>) -> Result<Value, anyhow::Error> {
    match source {
        "manual" => Ok(json!({"source": "manual"})),
        "webhook" | "cron" => {
            let node_id = node
                .ok_or_else(|| anyhow::anyhow!("--node is required for source '{}'", source))?;
            Ok(json!({"source": source, "nodeId": node_id}))
        }
        other => anyhow::bail!("unknown trigger source '{}'", other),
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Run { file, source, node } => {
            let raw = std::fs::read_to_string(&file)?;
            let workflow: Value = serde_json::from_str(&raw)?;
            let nodes = workflow.get("nodes").cloned().unwrap_or(json!([]));
            let edges = workflow.get("edges").cloned().unwrap_or(json!([]));

            let gateway = Arc::new(MemoryGateway::new());
            let run_id = uuid::Uuid::new_v4().to_string();
            gateway
                .insert_run(
                    WorkflowRun {
                        id: run_id.clone(),
                        status: RunStatus::Pending,
                        metadata: run_metadata(&source, node.as_deref())?,
                        execution_mode: ExecutionMode::Legacy,
                        user_id: None,
                        finished_at: None,
                    },
                    nodes.clone(),
                    edges,
                )
                .await;

            // One echo executor per node type in the file; triggers run
            // too, producing their configuration as the trigger payload
            let registry = ExecutorRegistry::new();
            if let Some(node_list) = nodes.as_array() {
                for entry in node_list {
                    if let Some(node_type) = entry.get("type").and_then(Value::as_str) {
                        registry.register(node_type, Arc::new(EchoExecutor)).await;
                    }
                }
            }

            let worker_id = uuid::Uuid::new_v4().to_string();
            let engine = WorkflowEngine::new(
                gateway.clone(),
                Arc::new(MemoryLockManager::new()),
                Arc::new(LogPublisher),
                registry,
                worker_id,
            );

            println!("Executing run {}", run_id);
            let status = engine.execute_workflow(&run_id).await?;
            match status {
                Some(status) => println!("Run finished: {:?}", status),
                None => println!("Run is owned by another worker"),
            }

            let mut rows = gateway.node_runs(&run_id).await?;
            rows.sort_by(|a, b| a.node_id.cmp(&b.node_id));
            for row in rows {
                println!("  {} [{}] {:?}", row.node_id, row.node_type, row.status);
            }
            if let Some(error) = gateway.run_error(&run_id).await {
                println!("Error: {}", error);
            }
        }
    }

    Ok(())
}
