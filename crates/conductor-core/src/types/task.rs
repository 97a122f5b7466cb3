use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::enums::{TaskEventType, TaskStatus};

/// A single tool invocation against a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub worker_id: String,
    pub tool: String,
    pub spec_json: Value,
    pub status: TaskStatus,
    pub result_json: Option<Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub flow_id: Option<String>,
}

/// Append-only audit log entry for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: String,
    pub task_id: String,
    #[serde(rename = "type")]
    pub event_type: TaskEventType,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// Payload accepted by `TaskRunner::create_task`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCreate {
    pub tool: String,
    pub spec: Value,
    pub flow_id: Option<String>,
}
