use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use conductor_core::types::{DesignRefinementConfig, Flow, FlowIteration, FlowStatus, TaskCreate, TaskStatus};
use conductor_runtime::RuntimeRegistry;
use conductor_storage::StorageGateway;
use serde_json::{json, Value};

use crate::critic::{run_carmack_critic, CriticResult};

/// Drives one design-refinement flow to completion: a coder task writes
/// `design.md`, a critic scores it, and the loop repeats until the score
/// clears the configured threshold or `max_iterations` is exhausted.
///
/// Built with explicit dependencies (no lazy module-level singleton, unlike
/// the implementation this was distilled from) so tests can construct one
/// against an in-memory gateway.
pub struct FlowCoordinator {
    gateway: Arc<dyn StorageGateway>,
    registry: Arc<RuntimeRegistry>,
    poll_interval: Duration,
}

impl FlowCoordinator {
    pub fn new(gateway: Arc<dyn StorageGateway>, registry: Arc<RuntimeRegistry>) -> Self {
        FlowCoordinator {
            gateway,
            registry,
            poll_interval: Duration::from_secs(1),
        }
    }

    #[cfg(test)]
    fn with_poll_interval(gateway: Arc<dyn StorageGateway>, registry: Arc<RuntimeRegistry>, poll_interval: Duration) -> Self {
        FlowCoordinator { gateway, registry, poll_interval }
    }

    /// Fire-and-forget: spawn the flow's run loop on the current runtime.
    pub fn kickoff(self: &Arc<Self>, flow_id: String) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            coordinator.run(flow_id).await;
        });
    }

    async fn run(&self, flow_id: String) {
        let Ok(Some(flow)) = self.gateway.get_flow(&flow_id).await else {
            return;
        };
        let Ok(Some(worker)) = self.gateway.get_worker(&flow.worker_id).await else {
            self.mark_failed(&flow_id, "worker_missing", None).await;
            return;
        };
        let config: DesignRefinementConfig = match serde_json::from_value(flow.config.clone()) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(flow_id, %err, "invalid design-refinement config");
                self.mark_failed(&flow_id, "invalid_config", None).await;
                return;
            }
        };

        let design_path = Path::new(&worker.workspace_path).join("design.md");
        if let Err(err) = std::fs::write(&design_path, format!("# Design Draft\n\n{}\n", config.initial_prompt)) {
            tracing::warn!(flow_id, %err, "failed to seed design.md");
            self.mark_failed(&flow_id, "io_error", None).await;
            return;
        }

        for iteration in 1..=config.max_iterations {
            let coder_spec = build_coder_spec(&config, iteration);
            let payload = TaskCreate {
                tool: "codex".to_string(),
                spec: coder_spec,
                flow_id: Some(flow_id.clone()),
            };

            let task = match conductor_runtime::create_task(&self.gateway, &self.registry, &worker.id, payload).await {
                Ok(task) => task,
                Err(err) => {
                    tracing::warn!(flow_id, iteration, %err, "failed to create coder task");
                    self.mark_failed(&flow_id, "task_creation_failed", Some(json!({ "error": err.to_string() }))).await;
                    return;
                }
            };

            let finished = self.wait_for_task_completion(&task.id).await;
            if finished.status == TaskStatus::Failed {
                self.mark_failed(&flow_id, "coder_task_failed", Some(json!({ "task_id": task.id }))).await;
                return;
            }

            let critic = run_carmack_critic(&design_path, iteration);
            self.record_iteration(&flow_id, iteration, &task.id, &critic).await;

            if critic.score >= config.min_score {
                self.mark_completed(&flow_id, iteration, &critic).await;
                return;
            }
        }

        self.mark_failed(&flow_id, "max_iterations_reached", None).await;
    }

    /// Poll the task row every `poll_interval` until it reaches a terminal
    /// status. A task that disappears (no known production path does this)
    /// simply keeps being polled, mirroring the loop this was grounded on.
    async fn wait_for_task_completion(&self, task_id: &str) -> conductor_core::types::Task {
        loop {
            if let Ok(Some(task)) = self.gateway.get_task(task_id).await {
                if task.status.is_terminal() {
                    return task;
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn record_iteration(&self, flow_id: &str, iteration: u32, task_id: &str, critic: &CriticResult) {
        let Ok(Some(mut flow)) = self.gateway.get_flow(flow_id).await else {
            return;
        };
        flow.state = json!({
            "last_iteration": iteration,
            "last_score": critic.score,
            "last_critic": critic,
        });
        flow.updated_at = Some(Utc::now());
        if self.gateway.put_flow(flow).await.is_err() {
            return;
        }
        let _ = self
            .gateway
            .append_flow_iteration(FlowIteration {
                id: uuid::Uuid::new_v4().to_string(),
                flow_id: flow_id.to_string(),
                iteration_index: iteration,
                coder_task_id: Some(task_id.to_string()),
                critic_task_payload: Some(serde_json::to_value(critic).unwrap_or(Value::Null)),
                created_at: Utc::now(),
            })
            .await;
    }

    async fn mark_completed(&self, flow_id: &str, iteration: u32, critic: &CriticResult) {
        self.finish(
            flow_id,
            FlowStatus::Completed,
            json!({ "final_iteration": iteration, "critic": critic }),
        )
        .await;
    }

    async fn mark_failed(&self, flow_id: &str, reason: &str, details: Option<Value>) {
        self.finish(flow_id, FlowStatus::Failed, json!({ "reason": reason, "details": details })).await;
    }

    async fn finish(&self, flow_id: &str, status: FlowStatus, result: Value) {
        let Ok(Some(mut flow)) = self.gateway.get_flow(flow_id).await else {
            return;
        };
        flow.status = status;
        flow.result = Some(result);
        flow.updated_at = Some(Utc::now());
        let _ = self.gateway.put_flow(flow).await;
    }
}

fn build_coder_spec(config: &DesignRefinementConfig, iteration: u32) -> Value {
    json!({
        "description": "Refine design document",
        "files": ["design.md"],
        "instructions": format!(
            "Update design.md to reflect feedback and improve clarity, performance, and feasibility. \
             This is iteration {iteration} of the refinement loop."
        ),
        "context": {
            "iteration": iteration,
            "initial_prompt": config.initial_prompt,
        },
    })
}

pub fn new_flow(worker_id: impl Into<String>, config: DesignRefinementConfig) -> Flow {
    let now = Utc::now();
    Flow {
        id: uuid::Uuid::new_v4().to_string(),
        flow_type: conductor_core::types::FlowType::DesignRefinement,
        status: FlowStatus::Running,
        worker_id: worker_id.into(),
        config: serde_json::to_value(&config).unwrap_or(Value::Null),
        state: json!({}),
        result: None,
        created_at: now,
        updated_at: None,
    }
}
