//! Daemon command: run one scheduler node against an in-memory store.

use std::sync::Arc;

use miette::{IntoDiagnostic, Result};
use serde_json::json;
use taskmill_scheduler::{
    RunContext, RunResult, TaskDefinition, TaskManager, TaskManagerConfig, TaskRequest,
};
use taskmill_store::MemoryStore;
use tracing::info;

/// Id of the recurring heartbeat task.
const HEARTBEAT_ID: &str = "taskmill:heartbeat";

/// Built-in task definitions.
fn definitions() -> Vec<TaskDefinition> {
    vec![
        TaskDefinition::from_fn("heartbeat", "Heartbeat", |ctx: RunContext| async move {
            let beats = ctx.task.state["beats"].as_u64().unwrap_or(0) + 1;
            info!(beats, "heartbeat");
            Ok(RunResult::new().with_state(json!({ "beats": beats })))
        })
        .with_description("Logs a line on every run and counts its beats"),
        TaskDefinition::from_fn("echo", "Echo", |ctx: RunContext| async move {
            info!(id = %ctx.task.id, params = %ctx.task.params, "echo");
            Ok(RunResult::new())
        })
        .with_description("Logs its params once"),
    ]
}

pub async fn run(config: TaskManagerConfig, heartbeat: &str) -> Result<()> {
    let store = Arc::new(MemoryStore::new(config.index.clone()));
    let manager = TaskManager::new(config, store).into_diagnostic()?;
    manager
        .register_task_definitions(definitions())
        .into_diagnostic()?;

    // Queued until start.
    let heartbeat_task = manager.ensure_scheduled(
        TaskRequest::new("heartbeat")
            .with_id(HEARTBEAT_ID)
            .every(heartbeat)
            .into_diagnostic()?,
    );
    let echo_task = manager.schedule(
        TaskRequest::new("echo").with_params(json!({ "message": "taskmill is up" })),
    );

    manager.start().await;
    heartbeat_task.await.into_diagnostic()?;
    echo_task.await.into_diagnostic()?;

    info!(node_id = manager.node_id(), "taskmill running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await.into_diagnostic()?;
    info!("received shutdown signal");

    manager.stop().await;
    let stats = manager.stats();
    info!(
        claimed = stats.total_claimed,
        succeeded = stats.total_succeeded,
        retried = stats.total_retried,
        failed = stats.total_failed,
        "taskmill stopped"
    );
    Ok(())
}
