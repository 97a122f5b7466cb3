use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use conductor_core::types::{Flow, FlowStatus, Task, TaskEvent, TaskEventType, TaskStatus, Worker, WorkerStatus};
use conductor_core::Config;
use conductor_mux::{MultiplexerAdapter, PaneCursor};
use conductor_storage::StorageGateway;
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::RuntimeError;

/// Per-worker state mutated only from within `monitor_loop`; guarded by one
/// `Mutex` rather than split across several because every field changes
/// together at a sentinel boundary.
struct Inner {
    running_tasks: VecDeque<String>,
    collecting_task_id: Option<String>,
    result_lines: Vec<String>,
}

/// Owns one worker's tmux pane and turns its raw output into task results.
///
/// Only the task at the front of `running_tasks` is ever "currently
/// collecting" a result: a tool that emits its start sentinel before a prior
/// task's end sentinel would have its output misattributed to the wrong
/// task. Fixing this would need a task-scoped sentinel id; out of scope here.
pub struct WorkerRuntime {
    pub worker_id: String,
    target: String,
    adapter: Arc<dyn MultiplexerAdapter>,
    gateway: Arc<dyn StorageGateway>,
    config: Arc<Config>,
    cursor: Mutex<PaneCursor>,
    inner: Mutex<Inner>,
    cancel: CancellationToken,
}

impl WorkerRuntime {
    pub fn new(
        worker_id: impl Into<String>,
        tmux_session: &str,
        adapter: Arc<dyn MultiplexerAdapter>,
        gateway: Arc<dyn StorageGateway>,
        config: Arc<Config>,
    ) -> Self {
        let target = format!("{tmux_session}:0");
        WorkerRuntime {
            worker_id: worker_id.into(),
            cursor: Mutex::new(PaneCursor::new(target.clone())),
            target,
            adapter,
            gateway,
            config,
            inner: Mutex::new(Inner {
                running_tasks: VecDeque::new(),
                collecting_task_id: None,
                result_lines: Vec::new(),
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the monitor loop. Takes `Arc<Self>` because the spawned task
    /// must outlive the caller.
    pub fn start(self: &Arc<Self>) {
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            runtime.monitor_loop().await;
        });
    }

    /// Stop the monitor loop. The runtime itself can still be queried; only
    /// the background polling task exits.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Append `task_id` to the run queue and type `command` into the pane.
    pub async fn enqueue_task(&self, task_id: impl Into<String>, command: String) -> Result<(), RuntimeError> {
        let task_id = task_id.into();
        {
            let mut inner = self.inner.lock().await;
            inner.running_tasks.push_back(task_id);
        }
        let adapter = Arc::clone(&self.adapter);
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || adapter.send_line(&target, &command))
            .await
            .expect("send_line task panicked")?;
        Ok(())
    }

    /// Administrative hook for callers that learn a task failed by means
    /// outside the monitor loop (e.g. an operator command). Only dequeues;
    /// does not touch the task row itself.
    pub async fn mark_task_failed(&self, task_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.running_tasks.retain(|id| id != task_id);
    }

    async fn monitor_loop(self: Arc<Self>) {
        tracing::info!(worker_id = %self.worker_id, "starting worker runtime monitor loop");
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(self.config.monitor_interval_secs));
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.cancel.cancelled() => {
                    tracing::info!(worker_id = %self.worker_id, "monitor loop cancelled, shutting down");
                    break;
                }
            }
            let captured = {
                let adapter = Arc::clone(&self.adapter);
                let mut cursor = self.cursor.lock().await;
                cursor.capture_new(adapter.as_ref())
            };
            match captured {
                Ok((_, new_text)) => {
                    if !new_text.is_empty() {
                        let lines: Vec<String> = new_text.lines().map(|l| l.to_string()).collect();
                        self.process_lines(lines).await;
                    }
                }
                Err(err) => tracing::warn!(worker_id = %self.worker_id, %err, "failed to capture pane"),
            }
        }
    }

    async fn process_lines(&self, lines: Vec<String>) {
        if lines.is_empty() {
            return;
        }
        for raw_line in lines {
            let stripped = raw_line.trim();
            if stripped.contains(self.config.sentinel_start.as_str()) {
                let mut inner = self.inner.lock().await;
                inner.collecting_task_id = inner.running_tasks.front().cloned();
                inner.result_lines.clear();
                tracing::info!(task_id = ?inner.collecting_task_id, "detected sentinel start");
                continue;
            }
            if stripped.contains(self.config.sentinel_end.as_str()) {
                tracing::info!(worker_id = %self.worker_id, "detected sentinel end");
                if let Err(err) = self.finalize_result().await {
                    tracing::warn!(%err, "failed to finalize task result");
                }
                continue;
            }

            let mut inner = self.inner.lock().await;
            if inner.collecting_task_id.is_some() {
                inner.result_lines.push(raw_line);
            } else if let Some(task_id) = inner.running_tasks.front().cloned() {
                drop(inner);
                let event = TaskEvent {
                    id: Uuid::new_v4().to_string(),
                    task_id,
                    event_type: TaskEventType::StdoutChunk,
                    payload: json!({ "line": raw_line }),
                    created_at: Utc::now(),
                };
                if let Err(err) = self.gateway.append_task_event(event).await {
                    tracing::warn!(%err, "failed to append stdout event");
                }
            }
        }
    }

    async fn finalize_result(&self) -> Result<(), RuntimeError> {
        let (task_id, payload_text) = {
            let mut inner = self.inner.lock().await;
            let task_id = inner.collecting_task_id.take();
            let payload_text = inner.result_lines.join("\n");
            inner.result_lines.clear();
            (task_id, payload_text)
        };
        let Some(task_id) = task_id else {
            return Ok(());
        };

        let mut status = TaskStatus::Completed;
        let mut result: Option<serde_json::Value> = None;
        let mut error_message: Option<String> = None;
        match serde_json::from_str::<serde_json::Value>(&payload_text) {
            Ok(value) => {
                let result_status = value.get("status").and_then(|v| v.as_str());
                if matches!(result_status, Some("failed") | Some("error")) {
                    status = TaskStatus::Failed;
                    error_message = value.get("error").and_then(|v| v.as_str()).map(str::to_string);
                }
                result = Some(value);
            }
            Err(_) => {
                status = TaskStatus::Failed;
                error_message = Some("Invalid JSON result from tool".to_string());
            }
        }

        let Some(mut task) = self.gateway.get_task(&task_id).await? else {
            return Ok(());
        };
        task.result_json = result.clone();
        task.error_message = error_message.clone();
        task.status = status;
        let now = Utc::now();
        task.finished_at = Some(now);
        if task.started_at.is_none() {
            task.started_at = Some(now);
        }
        let flow_id = task.flow_id.clone();
        let worker_id = task.worker_id.clone();
        self.gateway.put_task(task).await?;

        self.gateway
            .append_task_event(TaskEvent {
                id: Uuid::new_v4().to_string(),
                task_id: task_id.clone(),
                event_type: TaskEventType::ResultParsed,
                payload: json!({ "result": result, "error": error_message }),
                created_at: now,
            })
            .await?;

        {
            let mut inner = self.inner.lock().await;
            inner.running_tasks.retain(|id| id != &task_id);
        }
        let still_busy = !self.inner.lock().await.running_tasks.is_empty();

        if let Some(mut worker) = self.gateway.get_worker(&worker_id).await? {
            worker.status = if still_busy { WorkerStatus::Busy } else { WorkerStatus::Idle };
            worker.last_seen_at = now;
            self.gateway.put_worker(worker).await?;
        }

        if status == TaskStatus::Failed {
            if let Some(flow_id) = flow_id {
                if let Some(mut flow) = self.gateway.get_flow(&flow_id).await? {
                    flow.status = FlowStatus::Failed;
                    flow.result = Some(json!({
                        "reason": error_message.clone().unwrap_or_else(|| "task_failed".to_string()),
                        "task_id": task_id,
                    }));
                    self.gateway.put_flow(flow).await?;
                }
            }
        }

        Ok(())
    }
}

/// Tracks active worker runtimes so the caller does not spin up a second
/// monitor loop for the same worker.
pub struct RuntimeRegistry {
    adapter: Arc<dyn MultiplexerAdapter>,
    gateway: Arc<dyn StorageGateway>,
    config: Arc<Config>,
    runtimes: Mutex<std::collections::HashMap<String, Arc<WorkerRuntime>>>,
}

impl RuntimeRegistry {
    pub fn new(adapter: Arc<dyn MultiplexerAdapter>, gateway: Arc<dyn StorageGateway>, config: Arc<Config>) -> Self {
        RuntimeRegistry {
            adapter,
            gateway,
            config,
            runtimes: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Start a monitor loop for every worker already known to the gateway.
    pub async fn bootstrap(&self) -> Result<(), RuntimeError> {
        for worker in self.gateway.list_workers().await? {
            self.ensure_runtime(&worker.id, &worker.tmux_session).await;
        }
        Ok(())
    }

    pub async fn ensure_runtime(&self, worker_id: &str, tmux_session: &str) -> Arc<WorkerRuntime> {
        let mut runtimes = self.runtimes.lock().await;
        if let Some(existing) = runtimes.get(worker_id) {
            return Arc::clone(existing);
        }
        let runtime = Arc::new(WorkerRuntime::new(
            worker_id,
            tmux_session,
            Arc::clone(&self.adapter),
            Arc::clone(&self.gateway),
            Arc::clone(&self.config),
        ));
        runtime.start();
        runtimes.insert(worker_id.to_string(), Arc::clone(&runtime));
        runtime
    }

    pub async fn get(&self, worker_id: &str) -> Option<Arc<WorkerRuntime>> {
        self.runtimes.lock().await.get(worker_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_mux::TmuxError;
    use conductor_storage::InMemoryGateway;
    use std::sync::Mutex as StdMutex;

    pub(super) struct FakeAdapter {
        pub(super) sent: StdMutex<Vec<String>>,
    }

    impl MultiplexerAdapter for FakeAdapter {
        fn send_line(&self, _target: &str, command: &str) -> Result<(), TmuxError> {
            self.sent.lock().unwrap().push(command.to_string());
            Ok(())
        }

        fn capture_pane(&self, _target: &str) -> Result<String, TmuxError> {
            Ok(String::new())
        }

        fn list_all_panes(&self) -> Result<Vec<conductor_core::types::PaneInfo>, TmuxError> {
            Ok(vec![])
        }
    }

    fn worker(id: &str) -> Worker {
        Worker {
            id: id.to_string(),
            label: None,
            status: WorkerStatus::Idle,
            tmux_session: "main".to_string(),
            workspace_path: "/tmp".to_string(),
            web_terminal_url: None,
            web_terminal_pid: None,
            created_at: Utc::now(),
            updated_at: None,
            last_seen_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn enqueue_sends_the_command_and_tracks_the_task() {
        let adapter = Arc::new(FakeAdapter { sent: StdMutex::new(Vec::new()) });
        let gateway = Arc::new(InMemoryGateway::new());
        let config = Arc::new(Config::default());
        let runtime = WorkerRuntime::new("w1", "main", adapter.clone(), gateway, config);

        runtime.enqueue_task("t1", "bash run.sh".to_string()).await.unwrap();
        assert_eq!(adapter.sent.lock().unwrap().as_slice(), ["bash run.sh"]);
        assert_eq!(runtime.inner.lock().await.running_tasks.front().map(String::as_str), Some("t1"));
    }

    #[tokio::test]
    async fn finalize_result_marks_task_completed_on_valid_json() {
        let adapter = Arc::new(FakeAdapter { sent: StdMutex::new(Vec::new()) });
        let gateway = Arc::new(InMemoryGateway::new());
        let config = Arc::new(Config::default());

        gateway.put_worker(worker("w1")).await.unwrap();
        gateway
            .put_task(Task {
                id: "t1".to_string(),
                worker_id: "w1".to_string(),
                tool: "codex".to_string(),
                spec_json: json!({}),
                status: TaskStatus::Running,
                result_json: None,
                error_message: None,
                created_at: Utc::now(),
                started_at: Some(Utc::now()),
                finished_at: None,
                flow_id: None,
            })
            .await
            .unwrap();

        let runtime = WorkerRuntime::new("w1", "main", adapter, gateway.clone(), config);
        runtime.enqueue_task("t1", "bash run.sh".to_string()).await.unwrap();
        runtime.process_lines(vec!["<<<AGENT_RESULT_START>>>".to_string()]).await;
        runtime.process_lines(vec!["{\"status\": \"ok\"}".to_string()]).await;
        runtime.process_lines(vec!["<<<AGENT_RESULT_END>>>".to_string()]).await;

        let task = gateway.get_task("t1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.finished_at.is_some());

        let worker = gateway.get_worker("w1").await.unwrap().unwrap();
        assert_eq!(worker.status, WorkerStatus::Idle);
    }

    #[tokio::test]
    async fn finalize_result_marks_task_failed_on_malformed_json() {
        let adapter = Arc::new(FakeAdapter { sent: StdMutex::new(Vec::new()) });
        let gateway = Arc::new(InMemoryGateway::new());
        let config = Arc::new(Config::default());

        gateway.put_worker(worker("w1")).await.unwrap();
        gateway
            .put_task(Task {
                id: "t1".to_string(),
                worker_id: "w1".to_string(),
                tool: "codex".to_string(),
                spec_json: json!({}),
                status: TaskStatus::Running,
                result_json: None,
                error_message: None,
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
                flow_id: None,
            })
            .await
            .unwrap();

        let runtime = WorkerRuntime::new("w1", "main", adapter, gateway.clone(), config);
        runtime.enqueue_task("t1", "bash run.sh".to_string()).await.unwrap();
        runtime.process_lines(vec!["<<<AGENT_RESULT_START>>>".to_string()]).await;
        runtime.process_lines(vec!["not json".to_string()]).await;
        runtime.process_lines(vec!["<<<AGENT_RESULT_END>>>".to_string()]).await;

        let task = gateway.get_task("t1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some("Invalid JSON result from tool"));
    }

    #[tokio::test]
    async fn shutdown_stops_the_monitor_loop() {
        let adapter = Arc::new(FakeAdapter { sent: StdMutex::new(Vec::new()) });
        let gateway = Arc::new(InMemoryGateway::new());
        let mut config = Config::default();
        config.monitor_interval_secs = 0.01;
        let runtime = Arc::new(WorkerRuntime::new("w1", "main", adapter, gateway, Arc::new(config)));

        runtime.start();
        runtime.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(runtime.cancel.is_cancelled());
    }
}
