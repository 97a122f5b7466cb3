use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use conductor_core::types::{Task, TaskCreate, TaskEvent, TaskEventType, TaskStatus, WorkerStatus};
use conductor_storage::StorageGateway;
use serde_json::json;
use uuid::Uuid;

use crate::error::RuntimeError;
use crate::runtime::RuntimeRegistry;

/// Shim scripts are out of scope for this crate (they're the programs that
/// actually run inside the pane); only their paths matter here.
const SHIMS_DIR: &str = "shims";

fn shim_for(tool: &str) -> Option<&'static str> {
    match tool {
        "codex" => Some("run_codex_task.sh"),
        "claude" => Some("run_claude_task.sh"),
        "gemini" => Some("run_gemini_task.sh"),
        "critic_llm" => Some("run_critic_task.sh"),
        _ => None,
    }
}

fn build_command(tool: &str, spec_relative_path: &str) -> Result<String, RuntimeError> {
    let shim = shim_for(tool).ok_or_else(|| RuntimeError::UnsupportedTool(tool.to_string()))?;
    let shim_path = Path::new(SHIMS_DIR).join(shim);
    Ok(format!("bash {} {}", shell_quote(&shim_path.to_string_lossy()), shell_quote(spec_relative_path)))
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Creates a task, writes its spec to disk, and hands the shim invocation to
/// the worker's runtime. The task row must be committed before the runtime
/// enqueues the command, so the runtime's monitor loop can observe output
/// for a task id storage already knows about.
pub async fn create_task(
    gateway: &Arc<dyn StorageGateway>,
    registry: &RuntimeRegistry,
    worker_id: &str,
    payload: TaskCreate,
) -> Result<Task, RuntimeError> {
    let worker = gateway
        .get_worker(worker_id)
        .await?
        .ok_or_else(|| RuntimeError::WorkerNotFound(worker_id.to_string()))?;

    let task_id = Uuid::new_v4().to_string();
    let spec_relative = format!("specs/{task_id}.json");
    let spec_path = Path::new(&worker.workspace_path).join(&spec_relative);
    if let Some(parent) = spec_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&spec_path, serde_json::to_string_pretty(&payload.spec)?)?;

    let command = build_command(&payload.tool, &spec_relative)?;
    let now = Utc::now();

    let mut task = Task {
        id: task_id.clone(),
        worker_id: worker_id.to_string(),
        tool: payload.tool,
        spec_json: payload.spec,
        status: TaskStatus::Running,
        result_json: None,
        error_message: None,
        created_at: now,
        started_at: Some(now),
        finished_at: None,
        flow_id: payload.flow_id,
    };

    let mut worker = worker;
    worker.status = WorkerStatus::Busy;
    worker.last_seen_at = now;

    gateway.put_task(task.clone()).await?;
    gateway.put_worker(worker.clone()).await?;
    gateway
        .append_task_event(TaskEvent {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.clone(),
            event_type: TaskEventType::StateChange,
            payload: json!({ "state": "running", "command": command }),
            created_at: now,
        })
        .await?;

    let runtime = registry.ensure_runtime(worker_id, &worker.tmux_session).await;
    runtime.enqueue_task(task_id.clone(), command).await?;

    task.status = TaskStatus::Running;
    Ok(task)
}
