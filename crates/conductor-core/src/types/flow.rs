use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::enums::{FlowStatus, FlowType};

/// A supervised multi-task process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    #[serde(rename = "type")]
    pub flow_type: FlowType,
    pub status: FlowStatus,
    pub worker_id: String,
    pub config: Value,
    /// Rolling checkpoint, overwritten every iteration.
    pub state: Value,
    /// Set once, on the terminal transition.
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One design-refinement iteration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowIteration {
    pub id: String,
    pub flow_id: String,
    /// 1-based, monotonic and contiguous per flow.
    pub iteration_index: u32,
    pub coder_task_id: Option<String>,
    pub critic_task_payload: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Configuration accepted by the design-refinement coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignRefinementConfig {
    pub initial_prompt: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_min_score")]
    pub min_score: u32,
}

fn default_max_iterations() -> u32 {
    6
}

fn default_min_score() -> u32 {
    9
}
