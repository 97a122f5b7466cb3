//! Contract for the durable relational store backing workers/tasks/flows.
//!
//! The real store (Postgres, in the system this was distilled from) is an
//! external collaborator out of scope for this crate: only its interface
//! matters here. `InMemoryGateway` is a lightweight reference implementation
//! sufficient to run and test the runtime/watcher/flow components against.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use conductor_core::types::{Flow, FlowIteration, Task, TaskEvent, Worker};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("worker not found: {0}")]
    WorkerNotFound(String),
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("flow not found: {0}")]
    FlowNotFound(String),
}

#[async_trait]
pub trait StorageGateway: Send + Sync {
    async fn get_worker(&self, worker_id: &str) -> Result<Option<Worker>, GatewayError>;
    async fn list_workers(&self) -> Result<Vec<Worker>, GatewayError>;
    async fn put_worker(&self, worker: Worker) -> Result<(), GatewayError>;

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, GatewayError>;
    async fn put_task(&self, task: Task) -> Result<(), GatewayError>;
    async fn append_task_event(&self, event: TaskEvent) -> Result<(), GatewayError>;
    async fn list_task_events(&self, task_id: &str) -> Result<Vec<TaskEvent>, GatewayError>;

    async fn get_flow(&self, flow_id: &str) -> Result<Option<Flow>, GatewayError>;
    async fn put_flow(&self, flow: Flow) -> Result<(), GatewayError>;
    async fn append_flow_iteration(&self, iteration: FlowIteration) -> Result<(), GatewayError>;
}

/// In-memory reference implementation. Each table is a plain `HashMap`
/// behind one `Mutex`; good enough for the single-process scope this crate
/// covers, not a substitute for the real durable store.
#[derive(Default)]
pub struct InMemoryGateway {
    workers: Mutex<HashMap<String, Worker>>,
    tasks: Mutex<HashMap<String, Task>>,
    task_events: Mutex<HashMap<String, Vec<TaskEvent>>>,
    flows: Mutex<HashMap<String, Flow>>,
    flow_iterations: Mutex<HashMap<String, Vec<FlowIteration>>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every task currently held, for tests that need to find a
    /// task this gateway created without already knowing its id.
    pub fn all_tasks(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl StorageGateway for InMemoryGateway {
    async fn get_worker(&self, worker_id: &str) -> Result<Option<Worker>, GatewayError> {
        Ok(self.workers.lock().unwrap().get(worker_id).cloned())
    }

    async fn list_workers(&self) -> Result<Vec<Worker>, GatewayError> {
        Ok(self.workers.lock().unwrap().values().cloned().collect())
    }

    async fn put_worker(&self, worker: Worker) -> Result<(), GatewayError> {
        self.workers.lock().unwrap().insert(worker.id.clone(), worker);
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, GatewayError> {
        Ok(self.tasks.lock().unwrap().get(task_id).cloned())
    }

    async fn put_task(&self, task: Task) -> Result<(), GatewayError> {
        self.tasks.lock().unwrap().insert(task.id.clone(), task);
        Ok(())
    }

    async fn append_task_event(&self, event: TaskEvent) -> Result<(), GatewayError> {
        self.task_events.lock().unwrap().entry(event.task_id.clone()).or_default().push(event);
        Ok(())
    }

    async fn list_task_events(&self, task_id: &str) -> Result<Vec<TaskEvent>, GatewayError> {
        Ok(self.task_events.lock().unwrap().get(task_id).cloned().unwrap_or_default())
    }

    async fn get_flow(&self, flow_id: &str) -> Result<Option<Flow>, GatewayError> {
        Ok(self.flows.lock().unwrap().get(flow_id).cloned())
    }

    async fn put_flow(&self, flow: Flow) -> Result<(), GatewayError> {
        self.flows.lock().unwrap().insert(flow.id.clone(), flow);
        Ok(())
    }

    async fn append_flow_iteration(&self, iteration: FlowIteration) -> Result<(), GatewayError> {
        self.flow_iterations.lock().unwrap().entry(iteration.flow_id.clone()).or_default().push(iteration);
        Ok(())
    }
}
